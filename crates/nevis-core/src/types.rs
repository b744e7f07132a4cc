//! Domain types shared by the retrieval core, the stores and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};

pub type ChunkId = String;
pub type DocumentId = String;
pub type ClientId = String;

/// Lifecycle of a document's ingestion.
///
/// Moves forward only: `Pending -> Processing -> {Processed, Failed}`. A
/// terminal document goes back to `Pending` only through an explicit
/// reprocessing request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl DocumentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Processed)
                | (Self::Processing, Self::Failed)
                | (Self::Processed, Self::Pending)
                | (Self::Failed, Self::Pending)
        )
    }

    pub fn transition(self, next: Self) -> Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub client_id: ClientId,
    pub title: String,
    pub status: DocumentStatus,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn new(client_id: impl Into<ClientId>, title: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            client_id: client_id.into(),
            title: title.into(),
            status: DocumentStatus::Pending,
            summary: None,
            created_at: Utc::now(),
        }
    }
}

/// Searchable text fields of a client record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClientField {
    FirstName,
    LastName,
    Email,
    Description,
}

impl ClientField {
    pub const ALL: [ClientField; 4] = [Self::FirstName, Self::LastName, Self::Email, Self::Description];
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Client {
    pub id: ClientId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Client {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>, email: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            description,
            created_at: Utc::now(),
        }
    }

    pub fn field(&self, field: ClientField) -> Option<&str> {
        match field {
            ClientField::FirstName => Some(&self.first_name),
            ClientField::LastName => Some(&self.last_name),
            ClientField::Email => Some(&self.email),
            ClientField::Description => self.description.as_deref(),
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A persisted, embedded slice of a document.
///
/// - `id`: `"{document_id}#{chunk_index:05}"`, so ids sort in sequence order
/// - `start`/`end`: byte span of `content` inside the source text
/// - `overlap_tokens`: leading tokens shared with the previous chunk
/// - `novel_offset`: byte offset in `content` where the non-overlap part starts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub client_id: ClientId,
    pub chunk_index: usize,
    pub content: String,
    pub start: usize,
    pub end: usize,
    pub token_count: usize,
    pub overlap_tokens: usize,
    pub novel_offset: usize,
    pub embedding: Vec<f32>,
}

impl Chunk {
    pub fn make_id(document_id: &str, chunk_index: usize) -> ChunkId {
        format!("{document_id}#{chunk_index:05}")
    }

    /// The part of this chunk not repeated from the previous one.
    pub fn novel_text(&self) -> &str {
        self.content.get(self.novel_offset..).unwrap_or("")
    }
}

/// Restricts retrieval to a subset of chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeFilter {
    #[default]
    All,
    Client(ClientId),
    Documents(Vec<DocumentId>),
}

impl ScopeFilter {
    pub fn matches(&self, client_id: &str, document_id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Client(c) => c == client_id,
            Self::Documents(docs) => docs.iter().any(|d| d == document_id),
        }
    }
}

/// Raw `(id, score)` pair as returned by a store primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

impl ScoredId {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self { id: id.into(), score }
    }
}

/// Which stage produced a ranked list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Vector,
    Lexical,
    Fuzzy,
    Fusion,
    Rerank,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub id: String,
    /// 1-based, strictly increasing along the list.
    pub rank: usize,
    pub score: f32,
}

/// Ordered output of one retrieval or ranking stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedList {
    pub source: SourceKind,
    pub entries: Vec<RankedEntry>,
}

/// Descending score, then ascending id. Non-finite scores sort last.
pub fn score_desc_id_asc(a: (&str, f32), b: (&str, f32)) -> Ordering {
    let sa = if a.1.is_finite() { a.1 } else { f32::NEG_INFINITY };
    let sb = if b.1.is_finite() { b.1 } else { f32::NEG_INFINITY };
    sb.total_cmp(&sa).then_with(|| a.0.cmp(b.0))
}

impl RankedList {
    pub fn empty(source: SourceKind) -> Self {
        Self { source, entries: Vec::new() }
    }

    /// Sort raw scores (descending, ties by ascending id), keep the first
    /// `top_n` and assign ranks. Non-finite scores are dropped; a repeated id
    /// keeps its best score.
    pub fn from_scored(source: SourceKind, mut scored: Vec<ScoredId>, top_n: usize) -> Self {
        scored.retain(|s| s.score.is_finite());
        scored.sort_by(|a, b| score_desc_id_asc((&a.id, a.score), (&b.id, b.score)));
        let mut seen = std::collections::HashSet::new();
        scored.retain(|s| seen.insert(s.id.clone()));
        scored.truncate(top_n);
        Self::from_ordered(source, scored)
    }

    /// Assign ranks to an already ordered sequence.
    pub fn from_ordered(source: SourceKind, ordered: Vec<ScoredId>) -> Self {
        let entries = ordered
            .into_iter()
            .enumerate()
            .map(|(i, s)| RankedEntry { id: s.id, rank: i + 1, score: s.score })
            .collect();
        Self { source, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RankedEntry> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }

    pub fn rank_of(&self, id: &str) -> Option<usize> {
        self.entries.iter().find(|e| e.id == id).map(|e| e.rank)
    }

    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Client,
    Document,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "CLIENT",
            Self::Document => "DOCUMENT",
        })
    }
}

/// One row of the unified search answer.
///
/// `score` is the normalized score the list is ordered by; `raw_score` is the
/// branch-native score (trigram similarity or pairwise reranker score).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub kind: EntityKind,
    pub entity_id: String,
    pub rank: usize,
    pub score: f32,
    pub raw_score: f32,
    pub snippet: Option<String>,
}
