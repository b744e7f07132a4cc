use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use nevis_core::chunker::WhitespaceTokenizer;
use nevis_core::config::Settings;
use nevis_core::memory::{MemoryCatalog, MemoryChunkStore};
use nevis_core::traits::{ClientStore, DocumentStore, Embedder, LexicalStore, PairwiseScorer};
use nevis_core::types::{Chunk, Client, DocumentStatus, EntityKind, ScopeFilter, ScoredId};
use nevis_core::Error;
use nevis_embed::{FakeEmbedder, FakeScorer};
use nevis_hybrid::eval::{run_suite, EvalCase};
use nevis_hybrid::{Stack, VectorRetriever};

const DIM: usize = 64;

fn settings() -> Settings {
    let mut s = Settings::default();
    s.embedding.dim = DIM;
    s.chunking.chunk_size = 32;
    s.chunking.overlap = 4;
    s
}

fn memory_stack(embedder: Arc<dyn Embedder>, scorer: Arc<dyn PairwiseScorer>) -> Stack {
    Stack::in_memory(settings(), embedder, scorer, Arc::new(WhitespaceTokenizer))
}

fn fake_stack() -> Stack {
    memory_stack(Arc::new(FakeEmbedder::new(DIM)), Arc::new(FakeScorer))
}

async fn add_client(stack: &Stack, first: &str, last: &str) -> Client {
    let client = Client::new(first, last, format!("{}@example.com", first.to_lowercase()), None);
    stack.catalog.insert_client(client.clone()).await.unwrap();
    client
}

struct CountingEmbedder {
    inner: FakeEmbedder,
    calls: AtomicUsize,
}

impl Embedder for CountingEmbedder {
    fn model_id(&self) -> &str {
        "counting"
    }
    fn dim(&self) -> usize {
        self.inner.dim()
    }
    fn max_len(&self) -> usize {
        self.inner.max_len()
    }
    fn embed_batch(&self, texts: &[String]) -> nevis_core::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_batch(texts)
    }
}

struct CountingScorer(AtomicUsize);

impl PairwiseScorer for CountingScorer {
    fn model_id(&self) -> &str {
        "counting"
    }
    fn score_batch(&self, query: &str, passages: &[String]) -> nevis_core::Result<Vec<f32>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        FakeScorer.score_batch(query, passages)
    }
}

struct BrokenEmbedder;

impl Embedder for BrokenEmbedder {
    fn model_id(&self) -> &str {
        "broken"
    }
    fn dim(&self) -> usize {
        DIM
    }
    fn max_len(&self) -> usize {
        512
    }
    fn embed_batch(&self, _texts: &[String]) -> nevis_core::Result<Vec<Vec<f32>>> {
        Err(Error::capability("embedding", "model unavailable"))
    }
}

/// Lexical index whose writes always fail; reads go to an empty store.
struct RejectingLexical(MemoryChunkStore);

#[async_trait]
impl LexicalStore for RejectingLexical {
    async fn replace_document_chunks(&self, _document_id: &str, _chunks: &[Chunk]) -> nevis_core::Result<()> {
        Err(Error::Store("index writer unavailable".into()))
    }
    async fn full_text_rank(&self, query: &str, scope: &ScopeFilter, limit: usize) -> nevis_core::Result<Vec<ScoredId>> {
        self.0.full_text_rank(query, scope, limit).await
    }
    async fn trigram_rank(&self, query: &str, scope: &ScopeFilter, limit: usize) -> nevis_core::Result<Vec<ScoredId>> {
        self.0.trigram_rank(query, scope, limit).await
    }
}

#[tokio::test]
async fn retirement_planning_end_to_end() {
    let stack = fake_stack();
    let client = add_client(&stack, "Maria", "Lopez").await;
    let ingestor = stack.ingestor().unwrap();
    let doc = ingestor
        .upload(&client.id, "meeting notes", "Reviewed her 401k rollover strategies for retirement and next steps with the accountant.")
        .await
        .unwrap();
    assert_eq!(doc.status, DocumentStatus::Processed);
    ingestor.upload(&client.id, "recipes", "Sourdough starter feeding schedule and hydration ratios.").await.unwrap();

    let query = stack.embedder.embed_query("retirement planning").unwrap();
    let vector = VectorRetriever::new(stack.vectors.clone(), None);
    let ranked = vector.retrieve(&query, &ScopeFilter::All, 10).await.unwrap();
    let chunk_id = format!("{}#00000", doc.id);
    assert!(ranked.rank_of(&chunk_id).is_some(), "chunk {chunk_id} missing from vector retrieval");

    let service = stack.search_service().with_threshold(-5.0);
    let results = service.search("retirement planning", None).await.unwrap();
    let top_doc = results.iter().find(|r| r.kind == EntityKind::Document).expect("a document result");
    assert_eq!(top_doc.entity_id, doc.id);
    assert!(top_doc.snippet.as_deref().unwrap_or("").contains("401k rollover"));
    assert_eq!(results.iter().map(|r| r.rank).collect::<Vec<_>>(), (1..=results.len()).collect::<Vec<_>>());
}

#[tokio::test]
async fn default_threshold_drops_weak_documents() {
    let stack = fake_stack();
    let client = add_client(&stack, "Maria", "Lopez").await;
    let ingestor = stack.ingestor().unwrap();
    ingestor.upload(&client.id, "recipes", "Sourdough starter feeding schedule and hydration ratios.").await.unwrap();

    let results = stack.search_service().search("retirement planning", None).await.unwrap();
    assert!(results.iter().all(|r| r.kind != EntityKind::Document));
}

#[tokio::test]
async fn client_names_match_fuzzily() {
    let stack = fake_stack();
    let smith = add_client(&stack, "Jonathan", "Smithers").await;
    add_client(&stack, "Olga", "Petrova").await;

    let results = stack.search_service().search("smith", Some(5)).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].kind, EntityKind::Client);
    assert_eq!(results[0].entity_id, smith.id);
    assert_eq!(results[0].snippet.as_deref(), Some("Jonathan Smithers"));
    assert_eq!(results[0].score, 1.0);
}

#[tokio::test]
async fn empty_query_is_rejected_before_any_model_call() {
    let embedder = Arc::new(CountingEmbedder { inner: FakeEmbedder::new(DIM), calls: AtomicUsize::new(0) });
    let scorer = Arc::new(CountingScorer(AtomicUsize::new(0)));
    let stack = memory_stack(embedder.clone(), scorer.clone());
    let service = stack.search_service();

    for query in ["", "   ", "\n\t"] {
        assert!(matches!(service.search(query, None).await, Err(Error::EmptyQuery)));
    }
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(scorer.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn top_k_must_be_in_range() {
    let service = fake_stack().search_service();
    assert!(matches!(service.search("x", Some(0)).await, Err(Error::InvalidArgument(_))));
    assert!(matches!(service.search("x", Some(101)).await, Err(Error::InvalidArgument(_))));
    assert!(service.search("x", Some(100)).await.is_ok());
}

#[tokio::test]
async fn results_are_truncated_to_top_k() {
    let stack = fake_stack();
    for last in ["Smith", "Smithson", "Smithers", "Smyth"] {
        add_client(&stack, "Sam", last).await;
    }
    let results = stack.search_service().search("smith", Some(2)).await.unwrap();
    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn failing_embedder_marks_document_failed() {
    let stack = memory_stack(Arc::new(BrokenEmbedder), Arc::new(FakeScorer));
    let client = add_client(&stack, "Ada", "Byron").await;
    let ingestor = stack.ingestor().unwrap();

    let err = ingestor.upload(&client.id, "notes", "some text to embed").await.unwrap_err();
    assert!(matches!(err, Error::Capability { capability: "embedding", .. }));
    let docs = stack.catalog.documents(Some(&client.id)).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].status, DocumentStatus::Failed);

    let reset = ingestor.request_reprocessing(&docs[0].id).await.unwrap();
    assert_eq!(reset.status, DocumentStatus::Pending);
}

#[tokio::test]
async fn failed_lexical_write_rolls_back_vectors() {
    let vectors = Arc::new(MemoryChunkStore::new(DIM));
    let stack = Stack {
        settings: settings(),
        catalog: Arc::new(MemoryCatalog::new()),
        vectors: vectors.clone(),
        lexical: Arc::new(RejectingLexical(MemoryChunkStore::new(DIM))),
        embedder: Arc::new(FakeEmbedder::new(DIM)),
        scorer: Arc::new(FakeScorer),
        token_spans: Arc::new(WhitespaceTokenizer),
    };
    let client = add_client(&stack, "Maria", "Lopez").await;

    let err = stack.ingestor().unwrap().upload(&client.id, "notes", "401k rollover strategies for retirement planning.").await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));
    let docs = stack.catalog.documents(Some(&client.id)).await.unwrap();
    assert_eq!(docs[0].status, DocumentStatus::Failed);
    assert!(vectors.is_empty().await);

    let results = stack.search_service().with_threshold(-5.0).search("retirement planning", None).await.unwrap();
    assert!(results.iter().all(|r| r.entity_id != docs[0].id));
}

#[tokio::test]
async fn only_processed_documents_are_searchable() {
    let stack = fake_stack();
    let client = add_client(&stack, "Maria", "Lopez").await;
    let ingestor = stack.ingestor().unwrap();
    let doc = ingestor.upload(&client.id, "notes", "401k rollover strategies for retirement planning.").await.unwrap();
    let service = stack.search_service().with_threshold(-5.0);
    assert!(service.search("retirement planning", None).await.unwrap().iter().any(|r| r.entity_id == doc.id));

    ingestor.request_reprocessing(&doc.id).await.unwrap();
    let stored = stack.vectors.fetch_chunks(&[format!("{}#00000", doc.id)]).await.unwrap();
    assert_eq!(stored.len(), 1);
    let results = service.search("retirement planning", None).await.unwrap();
    assert!(results.iter().all(|r| r.entity_id != doc.id));
}

#[tokio::test]
async fn status_machine_guards_ingestion() {
    let stack = fake_stack();
    let client = add_client(&stack, "Ada", "Byron").await;
    let ingestor = stack.ingestor().unwrap();
    let doc = ingestor.upload(&client.id, "notes", "first version about pensions").await.unwrap();

    let again = ingestor.ingest(&doc.id, "second version").await.unwrap_err();
    assert!(matches!(again, Error::InvalidTransition { from: DocumentStatus::Processed, to: DocumentStatus::Processing }));

    let redone = ingestor.reprocess(&doc.id, "second version about annuities").await.unwrap();
    assert_eq!(redone.status, DocumentStatus::Processed);
    let results = stack.search_service().with_threshold(-5.0).search("annuities", None).await.unwrap();
    assert!(results.iter().any(|r| r.entity_id == doc.id));
    let stale = stack.search_service().with_threshold(-5.0).search("pensions", None).await.unwrap();
    assert!(stale.iter().all(|r| r.entity_id != doc.id || r.snippet.as_deref().is_some_and(|s| !s.contains("pensions"))));
}

#[tokio::test]
async fn upload_requires_a_known_client() {
    let stack = fake_stack();
    let err = stack.ingestor().unwrap().upload("nobody", "notes", "text").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn scoped_search_stays_inside_one_client() {
    let stack = fake_stack();
    let a = add_client(&stack, "Ann", "Archer").await;
    let b = add_client(&stack, "Bob", "Baker").await;
    let ingestor = stack.ingestor().unwrap();
    let doc_a = ingestor.upload(&a.id, "a", "retirement income planning for Ann").await.unwrap();
    let doc_b = ingestor.upload(&b.id, "b", "retirement income planning for Bob").await.unwrap();

    let service = stack.search_service().with_threshold(-5.0);
    let scoped = service.search_scoped("retirement planning", None, &ScopeFilter::Client(b.id.clone())).await.unwrap();
    assert!(scoped.iter().any(|r| r.entity_id == doc_b.id));
    assert!(scoped.iter().all(|r| r.entity_id != doc_a.id && r.entity_id != a.id));

    let docs_only = service.search_scoped("retirement planning", None, &ScopeFilter::Documents(vec![doc_a.id.clone()])).await.unwrap();
    assert_eq!(docs_only.iter().map(|r| r.entity_id.as_str()).collect::<Vec<_>>(), vec![doc_a.id.as_str()]);
}

#[tokio::test]
async fn eval_suite_scores_search_results() {
    let stack = fake_stack();
    let client = add_client(&stack, "Maria", "Lopez").await;
    let ingestor = stack.ingestor().unwrap();
    let doc = ingestor.upload(&client.id, "notes", "401k rollover strategies for retirement").await.unwrap();

    let service = stack.search_service().with_threshold(-5.0);
    let cases = vec![
        EvalCase { query: "retirement rollover".into(), relevant: vec![doc.id.clone()] },
        EvalCase { query: "   ".into(), relevant: vec![doc.id.clone()] },
    ];
    let report = run_suite(&service, &cases, 10).await;
    assert_eq!(report.total_cases, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.results[0].metrics.mrr, 1.0);
    assert_eq!(report.success_rate(), 0.5);
}

#[tokio::test(flavor = "multi_thread")]
async fn on_disk_stack_round_trip() {
    std::env::set_var("APP_USE_FAKE_EMBEDDINGS", "1");
    let tmp = tempfile::TempDir::new().unwrap();
    let mut s = settings();
    s.data.root = tmp.path().to_string_lossy().to_string();

    let stack = Stack::open(s.clone()).await.unwrap();
    let client = add_client(&stack, "Maria", "Lopez").await;
    let doc = stack.ingestor().unwrap().upload(&client.id, "notes", "401k rollover strategies for retirement").await.unwrap();
    drop(stack);

    let reopened = Stack::open(s).await.unwrap();
    assert_eq!(reopened.catalog.document(&doc.id).await.unwrap().unwrap().status, DocumentStatus::Processed);
    let results = reopened.search_service().with_threshold(-5.0).search("retirement planning", None).await.unwrap();
    assert!(results.iter().any(|r| r.kind == EntityKind::Document && r.entity_id == doc.id));
}
