//! Pairwise rescoring with threshold pruning.
//!
//! Scoring is CPU bound and runs on the blocking pool. A semaphore caps the
//! number of concurrent scoring jobs; later requests wait for a permit.
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use nevis_core::config::RerankerSettings;
use nevis_core::traits::PairwiseScorer;
use nevis_core::types::{RankedList, ScoredId, SourceKind};
use nevis_core::{Error, Result};

use crate::cancel::CancelFlag;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub text: String,
}

impl Candidate {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into() }
    }
}

pub struct RerankerFilter {
    scorer: Arc<dyn PairwiseScorer>,
    permits: Semaphore,
    batch_size: usize,
    top_m: usize,
}

impl RerankerFilter {
    pub fn new(scorer: Arc<dyn PairwiseScorer>, settings: &RerankerSettings) -> Self {
        Self {
            scorer,
            permits: Semaphore::new(settings.max_concurrency.max(1)),
            batch_size: settings.batch_size.max(1),
            top_m: settings.top_m,
        }
    }

    pub fn top_m(&self) -> usize {
        self.top_m
    }

    pub fn model_id(&self) -> &str {
        self.scorer.model_id()
    }

    /// Scores the first `top_m` candidates and keeps those scoring at least
    /// `threshold`, best first (ties by ascending id).
    pub async fn rerank(&self, query: &str, candidates: &[Candidate], threshold: f32, cancel: &CancelFlag) -> Result<RankedList> {
        let candidates = &candidates[..candidates.len().min(self.top_m)];
        if candidates.is_empty() {
            return Ok(RankedList::empty(SourceKind::Rerank));
        }
        let _permit = self.permits.acquire().await.map_err(|_| Error::Cancelled)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let scorer = self.scorer.clone();
        let query_owned = query.to_string();
        let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        let batch_size = self.batch_size;
        let flag = cancel.clone();
        let scores = tokio::task::spawn_blocking(move || -> Result<Vec<f32>> {
            let mut scores = Vec::with_capacity(texts.len());
            for batch in texts.chunks(batch_size) {
                if flag.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                scores.extend(scorer.score_batch(&query_owned, batch)?);
            }
            Ok(scores)
        })
        .await
        .map_err(|e| Error::capability("reranker", e))??;

        if scores.len() != candidates.len() {
            return Err(Error::capability("reranker", format!("expected {} scores, got {}", candidates.len(), scores.len())));
        }
        let kept: Vec<ScoredId> = candidates
            .iter()
            .zip(scores)
            .filter(|(_, score)| score.is_finite() && *score >= threshold)
            .map(|(c, score)| ScoredId::new(c.id.clone(), score))
            .collect();
        debug!(scored = candidates.len(), kept = kept.len(), threshold, "rerank");
        if kept.is_empty() {
            info!(scored = candidates.len(), threshold, "no candidate passed the reranker threshold");
        }
        Ok(RankedList::from_scored(SourceKind::Rerank, kept, usize::MAX))
    }
}
