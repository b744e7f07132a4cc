//! Capability and store seams.
//!
//! Model-backed capabilities are synchronous and CPU bound; callers move them
//! onto the blocking pool. Stores are async because the on-disk backends are.
use async_trait::async_trait;
use std::ops::Range;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{Chunk, Client, ClientId, Document, DocumentId, DocumentStatus, ScopeFilter, ScoredId};

pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()])?;
        out.pop().ok_or_else(|| crate::Error::capability("embedding", "model returned no vector"))
    }
}

/// Scores `(query, passage)` pairs; higher means more relevant.
pub trait PairwiseScorer: Send + Sync {
    fn model_id(&self) -> &str;
    fn score_batch(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;
}

/// Byte spans of the tokens a model would see for `text`, in order.
pub trait TokenSpans: Send + Sync {
    fn token_spans(&self, text: &str) -> Result<Vec<Range<usize>>>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;
}

/// Whether summaries are produced at ingest time.
#[derive(Clone)]
pub enum SummarizerState {
    Enabled(Arc<dyn Summarizer>),
    Disabled { reason: String },
}

impl SummarizerState {
    pub fn disabled(reason: impl Into<String>) -> Self {
        Self::Disabled { reason: reason.into() }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }
}

impl std::fmt::Debug for SummarizerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enabled(_) => f.write_str("Enabled"),
            Self::Disabled { reason } => f.debug_struct("Disabled").field("reason", reason).finish(),
        }
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn dim(&self) -> usize;

    /// Swap the full chunk set of one document in a single commit.
    async fn replace_document_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()>;

    /// Cosine similarity of every in-scope chunk, best first, at most `limit`.
    async fn nearest(&self, query: &[f32], scope: &ScopeFilter, limit: usize) -> Result<Vec<ScoredId>>;

    /// Chunks for `ids`, in the same order; unknown ids are skipped.
    async fn fetch_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>>;
}

#[async_trait]
pub trait LexicalStore: Send + Sync {
    async fn replace_document_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()>;

    /// Stemmed full-text rank (unbounded, higher is better). Chunks with no
    /// matching term are absent.
    async fn full_text_rank(&self, query: &str, scope: &ScopeFilter, limit: usize) -> Result<Vec<ScoredId>>;

    /// Fraction of the query's trigrams present in each chunk, in `[0, 1]`.
    async fn trigram_rank(&self, query: &str, scope: &ScopeFilter, limit: usize) -> Result<Vec<ScoredId>>;
}

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn clients(&self) -> Result<Vec<Client>>;
    async fn client(&self, id: &str) -> Result<Option<Client>>;
    async fn insert_client(&self, client: Client) -> Result<()>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn document(&self, id: &str) -> Result<Option<Document>>;
    async fn documents(&self, client_id: Option<&ClientId>) -> Result<Vec<Document>>;
    async fn insert_document(&self, document: Document) -> Result<()>;

    /// Applies one status transition; rejects illegal ones.
    async fn update_status(&self, id: &DocumentId, next: DocumentStatus) -> Result<Document>;
    async fn set_summary(&self, id: &DocumentId, summary: Option<String>) -> Result<()>;
}
