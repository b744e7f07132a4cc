//! Reciprocal Rank Fusion.
use std::collections::HashMap;
use tracing::debug;

use nevis_core::types::{RankedList, ScoredId, SourceKind};

/// Default RRF smoothing constant.
pub const DEFAULT_K: f32 = 60.0;

/// `score(id) = Σ 1 / (k + rank)` over the lists that contain `id`.
///
/// Only ranks matter; the lists' own scores are ignored. Ties go to the id
/// with the better single best rank, then to the smaller id.
pub fn fuse(lists: &[RankedList], k: f32) -> RankedList {
    let mut ranks: HashMap<&str, Vec<usize>> = HashMap::new();
    for list in lists {
        for entry in list.iter() {
            ranks.entry(entry.id.as_str()).or_default().push(entry.rank);
        }
    }
    // Terms are summed best rank first in f64, so equal rank multisets give equal scores.
    let k = f64::from(k);
    let mut fused: Vec<(&str, f64, usize)> = ranks
        .into_iter()
        .map(|(id, mut ranks)| {
            ranks.sort_unstable();
            let score = ranks.iter().map(|&r| 1.0 / (k + r as f64)).sum::<f64>();
            (id, score, ranks[0])
        })
        .collect();
    fused.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.2.cmp(&b.2)).then_with(|| a.0.cmp(b.0)));
    debug!(inputs = lists.len(), fused = fused.len(), "rrf fusion");
    RankedList::from_ordered(SourceKind::Fusion, fused.into_iter().map(|(id, score, _)| ScoredId::new(id, score as f32)).collect())
}
