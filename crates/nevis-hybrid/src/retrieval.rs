//! Chunk retrieval strategies. Each returns a `RankedList` of chunk ids.
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use nevis_core::config::ChunkSearchSettings;
use nevis_core::traits::{LexicalStore, VectorStore};
use nevis_core::types::{RankedList, ScopeFilter, ScoredId, SourceKind};
use nevis_core::{Error, Result};

/// Cosine nearest neighbours from a `VectorStore`.
#[derive(Clone)]
pub struct VectorRetriever {
    store: Arc<dyn VectorStore>,
    min_similarity: Option<f32>,
}

impl VectorRetriever {
    pub fn new(store: Arc<dyn VectorStore>, min_similarity: Option<f32>) -> Self {
        Self { store, min_similarity }
    }

    pub fn dim(&self) -> usize {
        self.store.dim()
    }

    pub async fn retrieve(&self, query_embedding: &[f32], scope: &ScopeFilter, top_n: usize) -> Result<RankedList> {
        let dim = self.store.dim();
        if query_embedding.len() != dim {
            return Err(Error::DimensionMismatch { expected: dim, actual: query_embedding.len() });
        }
        if top_n == 0 {
            return Ok(RankedList::empty(SourceKind::Vector));
        }
        let mut hits = self.store.nearest(query_embedding, scope, top_n).await?;
        if let Some(min) = self.min_similarity {
            hits.retain(|h| h.score >= min);
        }
        let list = RankedList::from_scored(SourceKind::Vector, hits, top_n);
        debug!(candidates = list.len(), "vector retrieval");
        Ok(list)
    }
}

/// `x / (1 + x)`: maps an unbounded non-negative rank into `[0, 1)`.
pub fn saturate(x: f32) -> f32 {
    if x.is_finite() && x > 0.0 {
        x / (1.0 + x)
    } else {
        0.0
    }
}

/// Stemmed full-text rank blended with trigram containment.
#[derive(Clone)]
pub struct LexicalRetriever {
    store: Arc<dyn LexicalStore>,
    lexical_weight: f32,
    trigram_weight: f32,
    trigram_threshold: f32,
}

impl LexicalRetriever {
    pub fn new(store: Arc<dyn LexicalStore>, settings: &ChunkSearchSettings) -> Self {
        Self {
            store,
            lexical_weight: settings.lexical_weight,
            trigram_weight: settings.trigram_weight,
            trigram_threshold: settings.trigram_threshold,
        }
    }

    pub fn combine(&self, term_rank: f32, trigram: f32) -> f32 {
        let trigram = if trigram >= self.trigram_threshold { trigram } else { 0.0 };
        self.lexical_weight * saturate(term_rank) + self.trigram_weight * trigram
    }

    pub async fn retrieve(&self, query: &str, scope: &ScopeFilter, top_n: usize) -> Result<RankedList> {
        if top_n == 0 || query.trim().is_empty() {
            return Ok(RankedList::empty(SourceKind::Lexical));
        }
        // Each primitive is capped at top_n before blending; a chunk just outside
        // one list blends with zero for that part.
        let (terms, trigrams) = tokio::try_join!(
            self.store.full_text_rank(query, scope, top_n),
            self.store.trigram_rank(query, scope, top_n),
        )?;

        let mut parts: HashMap<String, (f32, f32)> = HashMap::new();
        for hit in terms {
            parts.entry(hit.id).or_default().0 = hit.score;
        }
        for hit in trigrams {
            parts.entry(hit.id).or_default().1 = hit.score;
        }
        let scored: Vec<ScoredId> = parts
            .into_iter()
            .map(|(id, (term_rank, trigram))| ScoredId::new(id, self.combine(term_rank, trigram)))
            .filter(|s| s.score > 0.0)
            .collect();
        let list = RankedList::from_scored(SourceKind::Lexical, scored, top_n);
        debug!(candidates = list.len(), "lexical retrieval");
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nevis_core::memory::MemoryChunkStore;
    use nevis_core::types::Chunk;

    fn retriever() -> LexicalRetriever {
        LexicalRetriever::new(Arc::new(MemoryChunkStore::new(1)), &ChunkSearchSettings::default())
    }

    #[test]
    fn saturate_is_bounded() {
        assert_eq!(saturate(0.0), 0.0);
        assert_eq!(saturate(1.0), 0.5);
        assert!(saturate(1e9) < 1.0);
        assert_eq!(saturate(f32::NAN), 0.0);
    }

    #[test]
    fn weak_trigram_matches_count_as_zero() {
        let r = retriever();
        assert_eq!(r.combine(0.0, 0.29), 0.0);
        assert!((r.combine(0.0, 0.5) - 0.15).abs() < 1e-6);
        assert!((r.combine(1.0, 1.0) - 0.65).abs() < 1e-6);
    }

    fn chunk(doc: &str, text: &str) -> Chunk {
        Chunk {
            id: Chunk::make_id(doc, 0),
            document_id: doc.into(),
            client_id: "c1".into(),
            chunk_index: 0,
            content: text.into(),
            start: 0,
            end: text.len(),
            token_count: text.split_whitespace().count(),
            overlap_tokens: 0,
            novel_offset: 0,
            embedding: vec![0.0],
        }
    }

    #[tokio::test]
    async fn blends_only_what_each_capped_list_returned() {
        let store = Arc::new(MemoryChunkStore::new(1));
        for (doc, text) in [("a", "pension"), ("b", "pension pension pension"), ("c", "pensions pensions pensions pensions")] {
            LexicalStore::replace_document_chunks(store.as_ref(), doc, &[chunk(doc, text)]).await.unwrap();
        }
        let r = LexicalRetriever::new(store, &ChunkSearchSettings::default());

        // Top two by terms: c, b. Top two by trigrams: a, b.
        let list = r.retrieve("pension", &ScopeFilter::All, 2).await.unwrap();
        assert_eq!(list.ids(), vec!["b#00000", "c#00000"]);
        assert!((list.entries[1].score - r.combine(1.0 + 4f32.ln(), 0.0)).abs() < 1e-6);
    }
}
