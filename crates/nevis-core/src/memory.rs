//! In-memory backends: a chunk store that answers both vector and lexical
//! queries, and a client/document catalog that can persist itself as JSON.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

use crate::analysis::analyze;
use crate::error::{Error, Result};
use crate::traits::{ClientStore, DocumentStore, LexicalStore, VectorStore};
use crate::trigram::Trigrams;
use crate::types::{score_desc_id_asc, Chunk, ChunkId, Client, ClientId, Document, DocumentId, DocumentStatus, ScopeFilter, ScoredId};

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

fn top(mut scored: Vec<ScoredId>, limit: usize) -> Vec<ScoredId> {
    scored.sort_by(|a, b| score_desc_id_asc((&a.id, a.score), (&b.id, b.score)));
    scored.truncate(limit);
    scored
}

struct Entry {
    chunk: Chunk,
    term_freqs: HashMap<String, u32>,
    trigrams: Trigrams,
}

impl Entry {
    fn new(chunk: Chunk) -> Self {
        let mut term_freqs = HashMap::new();
        for term in analyze(&chunk.content) {
            *term_freqs.entry(term).or_insert(0) += 1;
        }
        let trigrams = Trigrams::of(&chunk.content);
        Self { chunk, term_freqs, trigrams }
    }

    fn in_scope(&self, scope: &ScopeFilter) -> bool {
        scope.matches(&self.chunk.client_id, &self.chunk.document_id)
    }
}

/// Brute-force chunk store for tests and small corpora.
pub struct MemoryChunkStore {
    dim: usize,
    entries: RwLock<HashMap<ChunkId, Entry>>,
}

impl MemoryChunkStore {
    pub fn new(dim: usize) -> Self {
        Self { dim, entries: RwLock::new(HashMap::new()) }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn document_chunks(&self, document_id: &str) -> Vec<Chunk> {
        let guard = self.entries.read().await;
        let mut chunks: Vec<Chunk> = guard.values().filter(|e| e.chunk.document_id == document_id).map(|e| e.chunk.clone()).collect();
        chunks.sort_by_key(|c| c.chunk_index);
        chunks
    }

    async fn swap(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut fresh = Vec::with_capacity(chunks.len());
        for c in chunks {
            if c.document_id != document_id {
                return Err(Error::InvalidArgument(format!("chunk {} belongs to {}, not {}", c.id, c.document_id, document_id)));
            }
            fresh.push(Entry::new(c.clone()));
        }
        let mut guard = self.entries.write().await;
        guard.retain(|_, e| e.chunk.document_id != document_id);
        for e in fresh {
            guard.insert(e.chunk.id.clone(), e);
        }
        debug!(document_id, chunks = chunks.len(), "replaced in-memory chunk set");
        Ok(())
    }
}

#[async_trait]
impl VectorStore for MemoryChunkStore {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn replace_document_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != self.dim) {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: bad.embedding.len() });
        }
        self.swap(document_id, chunks).await
    }

    async fn nearest(&self, query: &[f32], scope: &ScopeFilter, limit: usize) -> Result<Vec<ScoredId>> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: query.len() });
        }
        let guard = self.entries.read().await;
        let scored = guard
            .values()
            .filter(|e| e.in_scope(scope) && e.chunk.embedding.len() == self.dim)
            .map(|e| ScoredId::new(e.chunk.id.clone(), cosine(query, &e.chunk.embedding)))
            .collect();
        Ok(top(scored, limit))
    }

    async fn fetch_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let guard = self.entries.read().await;
        Ok(ids.iter().filter_map(|id| guard.get(id).map(|e| e.chunk.clone())).collect())
    }
}

#[async_trait]
impl LexicalStore for MemoryChunkStore {
    async fn replace_document_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        self.swap(document_id, chunks).await
    }

    /// Sum of `1 + ln(tf)` over the distinct query terms a chunk contains.
    async fn full_text_rank(&self, query: &str, scope: &ScopeFilter, limit: usize) -> Result<Vec<ScoredId>> {
        let mut terms = analyze(query);
        terms.sort();
        terms.dedup();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let guard = self.entries.read().await;
        let scored = guard
            .values()
            .filter(|e| e.in_scope(scope))
            .filter_map(|e| {
                let score: f32 = terms.iter().filter_map(|t| e.term_freqs.get(t)).map(|&tf| 1.0 + (tf as f32).ln()).sum();
                (score > 0.0).then(|| ScoredId::new(e.chunk.id.clone(), score))
            })
            .collect();
        Ok(top(scored, limit))
    }

    async fn trigram_rank(&self, query: &str, scope: &ScopeFilter, limit: usize) -> Result<Vec<ScoredId>> {
        let q = Trigrams::of(query);
        if q.is_empty() {
            return Ok(Vec::new());
        }
        let guard = self.entries.read().await;
        let scored = guard
            .values()
            .filter(|e| e.in_scope(scope))
            .filter_map(|e| {
                let sim = q.containment_in(&e.trigrams);
                (sim > 0.0).then(|| ScoredId::new(e.chunk.id.clone(), sim))
            })
            .collect();
        Ok(top(scored, limit))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogData {
    clients: BTreeMap<ClientId, Client>,
    documents: BTreeMap<DocumentId, Document>,
}

/// Clients and documents, optionally mirrored to a JSON file on every write.
#[derive(Default)]
pub struct MemoryCatalog {
    path: Option<PathBuf>,
    data: RwLock<CatalogData>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path` if it exists; later writes are saved back to it.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(Error::store)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CatalogData::default(),
            Err(e) => return Err(Error::store(e)),
        };
        Ok(Self { path: Some(path), data: RwLock::new(data) })
    }

    async fn persist(&self, data: &CatalogData) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Error::store)?;
        }
        let bytes = serde_json::to_vec_pretty(data).map_err(Error::store)?;
        tokio::fs::write(path, bytes).await.map_err(Error::store)
    }
}

#[async_trait]
impl ClientStore for MemoryCatalog {
    async fn clients(&self) -> Result<Vec<Client>> {
        Ok(self.data.read().await.clients.values().cloned().collect())
    }

    async fn client(&self, id: &str) -> Result<Option<Client>> {
        Ok(self.data.read().await.clients.get(id).cloned())
    }

    async fn insert_client(&self, client: Client) -> Result<()> {
        let mut data = self.data.write().await;
        data.clients.insert(client.id.clone(), client);
        self.persist(&data).await
    }
}

#[async_trait]
impl DocumentStore for MemoryCatalog {
    async fn document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.data.read().await.documents.get(id).cloned())
    }

    async fn documents(&self, client_id: Option<&ClientId>) -> Result<Vec<Document>> {
        let data = self.data.read().await;
        Ok(data.documents.values().filter(|d| client_id.is_none_or(|c| &d.client_id == c)).cloned().collect())
    }

    async fn insert_document(&self, document: Document) -> Result<()> {
        let mut data = self.data.write().await;
        if !data.clients.contains_key(&document.client_id) {
            return Err(Error::NotFound(format!("client {}", document.client_id)));
        }
        data.documents.insert(document.id.clone(), document);
        self.persist(&data).await
    }

    async fn update_status(&self, id: &DocumentId, next: DocumentStatus) -> Result<Document> {
        let mut data = self.data.write().await;
        let doc = data.documents.get_mut(id).ok_or_else(|| Error::NotFound(format!("document {id}")))?;
        doc.status = doc.status.transition(next)?;
        let updated = doc.clone();
        self.persist(&data).await?;
        Ok(updated)
    }

    async fn set_summary(&self, id: &DocumentId, summary: Option<String>) -> Result<()> {
        let mut data = self.data.write().await;
        let doc = data.documents.get_mut(id).ok_or_else(|| Error::NotFound(format!("document {id}")))?;
        doc.summary = summary;
        self.persist(&data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc: &str, idx: usize, text: &str, emb: Vec<f32>) -> Chunk {
        Chunk {
            id: Chunk::make_id(doc, idx),
            document_id: doc.into(),
            client_id: "c1".into(),
            chunk_index: idx,
            content: text.into(),
            start: 0,
            end: text.len(),
            token_count: text.split_whitespace().count(),
            overlap_tokens: 0,
            novel_offset: 0,
            embedding: emb,
        }
    }

    #[tokio::test]
    async fn replace_swaps_whole_document() {
        let store = MemoryChunkStore::new(2);
        VectorStore::replace_document_chunks(&store, "d1", &[chunk("d1", 0, "a", vec![1.0, 0.0]), chunk("d1", 1, "b", vec![0.0, 1.0])]).await.unwrap();
        VectorStore::replace_document_chunks(&store, "d1", &[chunk("d1", 0, "c", vec![1.0, 0.0])]).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.document_chunks("d1").await[0].content, "c");
    }

    #[tokio::test]
    async fn nearest_checks_dimension() {
        let store = MemoryChunkStore::new(2);
        let err = store.nearest(&[1.0, 0.0, 0.0], &ScopeFilter::All, 5).await.unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[tokio::test]
    async fn full_text_rank_uses_stems() {
        let store = MemoryChunkStore::new(1);
        LexicalStore::replace_document_chunks(&store, "d1", &[chunk("d1", 0, "planning for retirement", vec![1.0]), chunk("d1", 1, "gardening tips", vec![1.0])]).await.unwrap();
        let hits = store.full_text_rank("retirement planned", &ScopeFilter::All, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, Chunk::make_id("d1", 0));
    }

    #[tokio::test]
    async fn catalog_persists_and_enforces_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let catalog = MemoryCatalog::open(&path).await.unwrap();
        let client = Client::new("Ada", "Lovelace", "ada@example.com", None);
        let doc = Document::new(client.id.clone(), "notes");
        catalog.insert_client(client).await.unwrap();
        catalog.insert_document(doc.clone()).await.unwrap();
        assert!(catalog.update_status(&doc.id, DocumentStatus::Processed).await.is_err());
        catalog.update_status(&doc.id, DocumentStatus::Processing).await.unwrap();

        let reopened = MemoryCatalog::open(&path).await.unwrap();
        assert_eq!(reopened.document(&doc.id).await.unwrap().unwrap().status, DocumentStatus::Processing);
    }
}
