use std::sync::Arc;
use tracing::debug;

use nevis_core::config::ClientSearchSettings;
use nevis_core::traits::ClientStore;
use nevis_core::trigram::Trigrams;
use nevis_core::types::{Client, ClientField, RankedList, ScopeFilter, ScoredId, SourceKind};
use nevis_core::Result;

/// Trigram fuzzy ranking over client records.
#[derive(Clone)]
pub struct ClientMatcher {
    store: Arc<dyn ClientStore>,
    fields: Vec<ClientField>,
    min_similarity: f32,
}

/// Best word similarity of `query` against any of `fields` of `client`.
pub fn client_similarity(query: &Trigrams, client: &Client, fields: &[ClientField]) -> f32 {
    fields
        .iter()
        .filter_map(|f| client.field(*f))
        .map(|value| query.containment_in(&Trigrams::of(value)))
        .fold(0.0, f32::max)
}

impl ClientMatcher {
    pub fn new(store: Arc<dyn ClientStore>, settings: &ClientSearchSettings) -> Self {
        Self { store, fields: settings.fields.clone(), min_similarity: settings.min_similarity }
    }

    /// Ranks clients on the configured fields.
    pub async fn rank(&self, query: &str, scope: &ScopeFilter, top_n: usize) -> Result<RankedList> {
        self.matches_in(query, &self.fields, scope, top_n).await
    }

    pub async fn matches(&self, query: &str, fields: &[ClientField], top_n: usize) -> Result<RankedList> {
        self.matches_in(query, fields, &ScopeFilter::All, top_n).await
    }

    /// A client scope keeps only that client; a document scope has no clients.
    pub async fn matches_in(&self, query: &str, fields: &[ClientField], scope: &ScopeFilter, top_n: usize) -> Result<RankedList> {
        let q = Trigrams::of(query);
        if q.is_empty() || top_n == 0 || matches!(scope, ScopeFilter::Documents(_)) {
            return Ok(RankedList::empty(SourceKind::Fuzzy));
        }
        let clients = self.store.clients().await?;
        let total = clients.len();
        let scored: Vec<ScoredId> = clients
            .into_iter()
            .filter(|c| match scope {
                ScopeFilter::Client(id) => &c.id == id,
                _ => true,
            })
            .map(|c| {
                let sim = client_similarity(&q, &c, fields);
                ScoredId::new(c.id, sim)
            })
            .filter(|s| s.score > self.min_similarity)
            .collect();
        let list = RankedList::from_scored(SourceKind::Fuzzy, scored, top_n);
        debug!(clients = total, matched = list.len(), "client fuzzy match");
        Ok(list)
    }
}
