use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nevis_core::chunker::WhitespaceTokenizer;
use nevis_core::config::{RerankerSettings, Settings};
use nevis_core::traits::{ClientStore, DocumentStore, Embedder, PairwiseScorer};
use nevis_core::types::{Client, Document, DocumentStatus};
use nevis_embed::{FakeEmbedder, FakeScorer};
use nevis_hybrid::{Candidate, CancelFlag, RerankerFilter, Stack};

const DIM: usize = 64;

/// Tracks how many calls are running at once.
#[derive(Default)]
struct Gauge {
    started: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Scorer whose batches block until the gate opens.
#[derive(Default)]
struct GatedScorer {
    gauge: Gauge,
    open: AtomicBool,
}

impl GatedScorer {
    fn release(&self) {
        self.open.store(true, Ordering::SeqCst);
    }
}

impl PairwiseScorer for GatedScorer {
    fn model_id(&self) -> &str {
        "gated"
    }
    fn score_batch(&self, _query: &str, passages: &[String]) -> nevis_core::Result<Vec<f32>> {
        self.gauge.enter();
        while !self.open.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
        self.gauge.leave();
        Ok(vec![10.0; passages.len()])
    }
}

struct SlowEmbedder {
    inner: FakeEmbedder,
    gauge: Gauge,
}

impl Embedder for SlowEmbedder {
    fn model_id(&self) -> &str {
        "slow"
    }
    fn dim(&self) -> usize {
        self.inner.dim()
    }
    fn max_len(&self) -> usize {
        self.inner.max_len()
    }
    fn embed_batch(&self, texts: &[String]) -> nevis_core::Result<Vec<Vec<f32>>> {
        self.gauge.enter();
        std::thread::sleep(Duration::from_millis(150));
        self.gauge.leave();
        self.inner.embed_batch(texts)
    }
}

fn settings() -> Settings {
    let mut s = Settings::default();
    s.embedding.dim = DIM;
    s.chunking.chunk_size = 4;
    s.chunking.overlap = 1;
    s
}

async fn wait_until(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

async fn add_client(stack: &Stack) -> Client {
    let client = Client::new("Ada", "Byron", "ada@example.com", None);
    stack.catalog.insert_client(client.clone()).await.unwrap();
    client
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reranks_beyond_max_concurrency_wait_for_a_permit() {
    let scorer = Arc::new(GatedScorer::default());
    let settings = RerankerSettings { max_concurrency: 1, ..RerankerSettings::default() };
    let filter = Arc::new(RerankerFilter::new(scorer.clone(), &settings));
    let spawn_rerank = |filter: Arc<RerankerFilter>| {
        tokio::spawn(async move { filter.rerank("pensions", &[Candidate::new("c1", "pension notes")], 0.0, &CancelFlag::new()).await })
    };

    let first = spawn_rerank(filter.clone());
    wait_until(|| scorer.gauge.started() == 1).await;
    let second = spawn_rerank(filter.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(scorer.gauge.started(), 1);
    assert!(!second.is_finished());

    scorer.release();
    assert_eq!(first.await.unwrap().unwrap().len(), 1);
    assert_eq!(second.await.unwrap().unwrap().len(), 1);
    assert_eq!(scorer.gauge.started(), 2);
    assert_eq!(scorer.gauge.peak(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_a_search_stops_remaining_rerank_batches() {
    let scorer = Arc::new(GatedScorer::default());
    let mut s = settings();
    s.reranker.batch_size = 1;
    let stack = Stack::in_memory(s, Arc::new(FakeEmbedder::new(DIM)), scorer.clone(), Arc::new(WhitespaceTokenizer));
    let client = add_client(&stack).await;
    let text = (1..=8).map(|i| format!("retirement planning review {i}")).collect::<Vec<_>>().join(" ");
    stack.ingestor().unwrap().upload(&client.id, "notes", &text).await.unwrap();

    let service = Arc::new(stack.search_service().with_threshold(-5.0));
    let search = tokio::spawn({
        let service = service.clone();
        async move { service.search("retirement planning", None).await }
    });
    wait_until(|| scorer.gauge.started() == 1).await;
    search.abort();
    assert!(search.await.unwrap_err().is_cancelled());

    scorer.release();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(scorer.gauge.started(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_ingests_of_one_document_run_one_at_a_time() {
    let embedder = Arc::new(SlowEmbedder { inner: FakeEmbedder::new(DIM), gauge: Gauge::default() });
    let stack = Stack::in_memory(settings(), embedder.clone(), Arc::new(FakeScorer), Arc::new(WhitespaceTokenizer));
    let client = add_client(&stack).await;
    let doc = Document::new(client.id.clone(), "notes");
    stack.catalog.insert_document(doc.clone()).await.unwrap();
    let ingestor = Arc::new(stack.ingestor().unwrap());

    let first = tokio::spawn({
        let ingestor = ingestor.clone();
        let id = doc.id.clone();
        async move { ingestor.ingest(&id, "first version about pensions").await }
    });
    wait_until(|| embedder.gauge.started() == 1).await;
    // Would be rejected as PROCESSING -> PENDING if it did not wait for the first ingest.
    let second = ingestor.reprocess(&doc.id, "second version about annuities").await.unwrap();

    assert_eq!(first.await.unwrap().unwrap().status, DocumentStatus::Processed);
    assert_eq!(second.status, DocumentStatus::Processed);
    assert_eq!(embedder.gauge.started(), 2);
    assert_eq!(embedder.gauge.peak(), 1);
    assert_eq!(stack.catalog.document(&doc.id).await.unwrap().unwrap().status, DocumentStatus::Processed);
}
