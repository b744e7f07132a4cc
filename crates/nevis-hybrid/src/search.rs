//! Unified client and document search.
//!
//! The client branch (trigram fuzzy match) and the document branch (vector and
//! lexical retrieval, RRF, reranking) run concurrently. Each branch's results
//! are normalized to rank percentiles `(n - rank + 1) / n` so the two scales
//! can be merged, then the combined list is truncated to `top_k`.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use nevis_core::config::{SearchSettings, Settings};
use nevis_core::traits::{ClientStore, DocumentStore, Embedder, LexicalStore, PairwiseScorer, VectorStore};
use nevis_core::types::{Chunk, DocumentStatus, EntityKind, RankedList, ScopeFilter, SearchResult};
use nevis_core::{Error, Result};

use crate::cancel::CancelFlag;
use crate::client_match::ClientMatcher;
use crate::fusion::fuse;
use crate::rerank::{Candidate, RerankerFilter};
use crate::retrieval::{LexicalRetriever, VectorRetriever};

const SNIPPET_CHARS: usize = 280;

/// One branch result before normalization.
#[derive(Debug, Clone)]
struct BranchHit {
    kind: EntityKind,
    id: String,
    rank: usize,
    raw_score: f32,
    snippet: Option<String>,
}

pub struct SearchService {
    embedder: Arc<dyn Embedder>,
    chunks: Arc<dyn VectorStore>,
    clients: Arc<dyn ClientStore>,
    documents: Arc<dyn DocumentStore>,
    vector: VectorRetriever,
    lexical: LexicalRetriever,
    reranker: RerankerFilter,
    matcher: ClientMatcher,
    limits: SearchSettings,
    rrf_k: f32,
    retrieval_multiplier: usize,
    threshold: f32,
}

impl SearchService {
    pub fn new(
        settings: &Settings,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        lexical: Arc<dyn LexicalStore>,
        scorer: Arc<dyn PairwiseScorer>,
        clients: Arc<dyn ClientStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        let cs = &settings.chunk_search;
        Self {
            embedder,
            vector: VectorRetriever::new(vectors.clone(), cs.vector_similarity_threshold),
            lexical: LexicalRetriever::new(lexical, cs),
            reranker: RerankerFilter::new(scorer, &settings.reranker),
            matcher: ClientMatcher::new(clients.clone(), &settings.client_search),
            chunks: vectors,
            clients,
            documents,
            limits: settings.search.clone(),
            rrf_k: settings.rrf.k,
            retrieval_multiplier: cs.retrieval_multiplier.max(1),
            threshold: cs.reranker_score_threshold,
        }
    }

    /// Overrides the reranker score threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub async fn search(&self, query: &str, top_k: Option<usize>) -> Result<Vec<SearchResult>> {
        self.search_scoped(query, top_k, &ScopeFilter::All).await
    }

    pub async fn search_scoped(&self, query: &str, top_k: Option<usize>, scope: &ScopeFilter) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::EmptyQuery);
        }
        let top_k = self.resolve_top_k(top_k)?;

        let cancel = CancelFlag::new();
        let guard = cancel.cancel_on_drop();
        let (clients, documents) = tokio::try_join!(self.client_branch(query, scope, top_k), self.document_branch(query, scope, &cancel))?;
        guard.disarm();

        let (n_clients, n_documents) = (clients.len(), documents.len());
        let results = merge(vec![clients, documents], top_k);
        info!(clients = n_clients, documents = n_documents, returned = results.len(), top_k, "search complete");
        Ok(results)
    }

    fn resolve_top_k(&self, top_k: Option<usize>) -> Result<usize> {
        let top_k = top_k.unwrap_or(self.limits.default_top_k);
        if top_k == 0 || top_k > self.limits.max_top_k {
            return Err(Error::InvalidArgument(format!("top_k must be in 1..={}, got {}", self.limits.max_top_k, top_k)));
        }
        Ok(top_k)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let embedder = self.embedder.clone();
        let text = query.to_string();
        tokio::task::spawn_blocking(move || embedder.embed_query(&text)).await.map_err(|e| Error::capability("embedding", e))?
    }

    async fn client_branch(&self, query: &str, scope: &ScopeFilter, top_k: usize) -> Result<Vec<BranchHit>> {
        let ranked = self.matcher.rank(query, scope, top_k).await?;
        let mut hits = Vec::with_capacity(ranked.len());
        for entry in ranked.iter() {
            let snippet = self.clients.client(&entry.id).await?.map(|c| c.display_name());
            hits.push(BranchHit { kind: EntityKind::Client, id: entry.id.clone(), rank: entry.rank, raw_score: entry.score, snippet });
        }
        Ok(hits)
    }

    async fn document_branch(&self, query: &str, scope: &ScopeFilter, cancel: &CancelFlag) -> Result<Vec<BranchHit>> {
        let top_m = self.reranker.top_m();
        let pool = top_m.saturating_mul(self.retrieval_multiplier);
        let semantic = async {
            let embedding = self.embed_query(query).await?;
            self.vector.retrieve(&embedding, scope, pool).await
        };
        let (vector, lexical) = tokio::try_join!(semantic, self.lexical.retrieve(query, scope, pool))?;
        let (n_vector, n_lexical) = (vector.len(), lexical.len());

        let mut fused = fuse(&[vector, lexical], self.rrf_k);
        fused.truncate(top_m);
        debug!(vector = n_vector, lexical = n_lexical, fused = fused.len(), "document candidates");
        if fused.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = fused.iter().map(|e| e.id.clone()).collect();
        let chunks = self.visible(self.chunks.fetch_chunks(&ids).await?).await?;
        let by_id: HashMap<&str, &Chunk> = chunks.iter().map(|c| (c.id.as_str(), c)).collect();
        let candidates: Vec<Candidate> = ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|c| Candidate::new(id.clone(), c.content.clone())))
            .collect();

        let reranked = self.reranker.rerank(query, &candidates, self.threshold, cancel).await?;
        Ok(collapse_to_documents(&reranked, &by_id))
    }

    /// Only chunks of PROCESSED documents are searchable.
    async fn visible(&self, chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        let mut processed: HashMap<String, bool> = HashMap::new();
        let total = chunks.len();
        let mut kept = Vec::with_capacity(total);
        for chunk in chunks {
            let ok = match processed.get(&chunk.document_id) {
                Some(ok) => *ok,
                None => {
                    let ok = self.documents.document(&chunk.document_id).await?.is_some_and(|d| d.status == DocumentStatus::Processed);
                    processed.insert(chunk.document_id.clone(), ok);
                    ok
                }
            };
            if ok {
                kept.push(chunk);
            }
        }
        if kept.len() < total {
            debug!(hidden = total - kept.len(), "chunks of unprocessed documents skipped");
        }
        Ok(kept)
    }
}

/// Keeps each document's best-ranked chunk; ranks are re-assigned densely.
fn collapse_to_documents(reranked: &RankedList, chunks: &HashMap<&str, &Chunk>) -> Vec<BranchHit> {
    let mut seen = HashSet::new();
    let mut hits = Vec::new();
    for entry in reranked.iter() {
        let Some(chunk) = chunks.get(entry.id.as_str()) else { continue };
        if !seen.insert(chunk.document_id.clone()) {
            continue;
        }
        hits.push(BranchHit {
            kind: EntityKind::Document,
            id: chunk.document_id.clone(),
            rank: hits.len() + 1,
            raw_score: entry.score,
            snippet: Some(snippet(&chunk.content)),
        });
    }
    hits
}

fn snippet(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(SNIPPET_CHARS) {
        Some((cut, _)) => format!("{}…", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

fn percentile(rank: usize, n: usize) -> f32 {
    (n + 1 - rank) as f32 / n as f32
}

/// Normalized score desc, branch rank asc, clients before documents, id asc.
fn merge(branches: Vec<Vec<BranchHit>>, top_k: usize) -> Vec<SearchResult> {
    let mut scored: Vec<(f32, BranchHit)> = branches
        .into_iter()
        .flat_map(|hits| {
            let n = hits.len();
            hits.into_iter().map(move |h| (percentile(h.rank, n), h))
        })
        .collect();
    scored.sort_by(|(sa, a), (sb, b)| {
        sb.total_cmp(sa).then(a.rank.cmp(&b.rank)).then(a.kind.cmp(&b.kind)).then_with(|| a.id.cmp(&b.id))
    });
    scored.truncate(top_k);
    scored
        .into_iter()
        .enumerate()
        .map(|(i, (score, h))| SearchResult { kind: h.kind, entity_id: h.id, rank: i + 1, score, raw_score: h.raw_score, snippet: h.snippet })
        .collect()
}
