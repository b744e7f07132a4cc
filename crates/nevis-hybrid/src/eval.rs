//! Retrieval-quality metrics with binary relevance.
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::search::SearchService;

/// Cutoff used for the `@k` metrics of a suite run.
pub const EVAL_CUTOFF: usize = 5;

/// Reciprocal rank of the first relevant id, 0 if none.
pub fn mrr(ranked: &[String], relevant: &HashSet<String>) -> f64 {
    ranked.iter().position(|id| relevant.contains(id)).map(|i| 1.0 / (i + 1) as f64).unwrap_or(0.0)
}

pub fn recall_at(ranked: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    let found = ranked.iter().take(k).filter(|id| relevant.contains(*id)).count();
    found as f64 / relevant.len() as f64
}

/// Fraction of the returned ids that are relevant.
pub fn precision(ranked: &[String], relevant: &HashSet<String>) -> f64 {
    precision_at(ranked, relevant, ranked.len())
}

pub fn precision_at(ranked: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    let cut = &ranked[..ranked.len().min(k)];
    if cut.is_empty() {
        return 0.0;
    }
    cut.iter().filter(|id| relevant.contains(*id)).count() as f64 / cut.len() as f64
}

/// nDCG with gain 1 for relevant ids and a `log2(rank + 1)` discount.
pub fn ndcg_at(ranked: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    let discount = |i: usize| 1.0 / ((i + 2) as f64).log2();
    let dcg: f64 = ranked.iter().take(k).enumerate().filter(|(_, id)| relevant.contains(*id)).map(|(i, _)| discount(i)).sum();
    let ideal: f64 = (0..relevant.len().min(k)).map(discount).sum();
    if ideal == 0.0 {
        0.0
    } else {
        dcg / ideal
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub mrr: f64,
    pub recall_at_k: f64,
    pub ndcg_at_k: f64,
    pub precision: f64,
}

pub fn evaluate(ranked: &[String], relevant: &HashSet<String>, k: usize) -> QueryMetrics {
    QueryMetrics {
        mrr: mrr(ranked, relevant),
        recall_at_k: recall_at(ranked, relevant, k),
        ndcg_at_k: ndcg_at(ranked, relevant, k),
        precision: precision(ranked, relevant),
    }
}

/// Mean of each metric; `None` for an empty slice.
pub fn aggregate(metrics: &[QueryMetrics]) -> Option<QueryMetrics> {
    if metrics.is_empty() {
        return None;
    }
    let n = metrics.len() as f64;
    let mean = |f: fn(&QueryMetrics) -> f64| metrics.iter().map(f).sum::<f64>() / n;
    Some(QueryMetrics {
        mrr: mean(|m| m.mrr),
        recall_at_k: mean(|m| m.recall_at_k),
        ndcg_at_k: mean(|m| m.ndcg_at_k),
        precision: mean(|m| m.precision),
    })
}

/// One labelled query: entity ids (client or document) that should be found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalCase {
    pub query: String,
    pub relevant: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub query: String,
    pub returned: Vec<String>,
    pub metrics: QueryMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub cutoff: usize,
    pub total_cases: usize,
    pub results: Vec<CaseResult>,
    /// `(query, error)` for cases whose search failed.
    pub failures: Vec<(String, String)>,
    pub average: Option<QueryMetrics>,
}

impl EvalReport {
    pub fn success_rate(&self) -> f64 {
        if self.total_cases == 0 {
            0.0
        } else {
            self.results.len() as f64 / self.total_cases as f64
        }
    }
}

pub fn load_cases(path: &Path) -> anyhow::Result<Vec<EvalCase>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Runs every case through `service` and scores the returned entity ids.
pub async fn run_suite(service: &SearchService, cases: &[EvalCase], top_k: usize) -> EvalReport {
    let mut results = Vec::with_capacity(cases.len());
    let mut failures = Vec::new();
    for case in cases {
        match service.search(&case.query, Some(top_k)).await {
            Ok(hits) => {
                let returned: Vec<String> = hits.into_iter().map(|h| h.entity_id).collect();
                let relevant: HashSet<String> = case.relevant.iter().cloned().collect();
                let metrics = evaluate(&returned, &relevant, EVAL_CUTOFF);
                results.push(CaseResult { query: case.query.clone(), returned, metrics });
            }
            Err(err) => {
                warn!(query = %case.query, error = %err, "eval case failed");
                failures.push((case.query.clone(), err.to_string()));
            }
        }
    }
    let metrics: Vec<QueryMetrics> = results.iter().map(|r| r.metrics.clone()).collect();
    let average = aggregate(&metrics);
    info!(cases = cases.len(), failed = failures.len(), "eval suite finished");
    EvalReport { cutoff: EVAL_CUTOFF, total_cases: cases.len(), results, failures, average }
}
