//! Wiring of stores and model capabilities from `Settings`.
use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use nevis_core::chunker::Chunker;
use nevis_core::config::Settings;
use nevis_core::memory::{MemoryCatalog, MemoryChunkStore};
use nevis_core::traits::{Embedder, LexicalStore, PairwiseScorer, SummarizerState, TokenSpans, VectorStore};
use nevis_embed::{get_default_embedder, get_default_scorer, get_default_token_spans};
use nevis_text::index::TantivyChunkIndex;
use nevis_vector::LanceChunkStore;

use crate::ingest::DocumentIngestor;
use crate::search::SearchService;

pub struct Stack {
    pub settings: Settings,
    pub catalog: Arc<MemoryCatalog>,
    pub vectors: Arc<dyn VectorStore>,
    pub lexical: Arc<dyn LexicalStore>,
    pub embedder: Arc<dyn Embedder>,
    pub scorer: Arc<dyn PairwiseScorer>,
    pub token_spans: Arc<dyn TokenSpans>,
}

impl Stack {
    /// On-disk stores under `data.root` and the configured models.
    pub async fn open(settings: Settings) -> anyhow::Result<Self> {
        settings.validate()?;
        let data = &settings.data;
        let catalog = MemoryCatalog::open(data.catalog_path()).await.context("opening catalog")?;
        let vectors = LanceChunkStore::open(&data.lancedb_path(), &data.table, settings.embedding.dim).await.context("opening LanceDB table")?;
        let lexical = TantivyChunkIndex::open(&data.tantivy_path()).context("opening tantivy index")?;
        let embedder = get_default_embedder(&settings.embedding).context("loading embedder")?;
        let scorer = get_default_scorer(&settings.reranker).context("loading reranker")?;
        let token_spans = get_default_token_spans(&settings.embedding).context("loading tokenizer")?;
        info!(root = %data.root_dir().display(), embedder = embedder.model_id(), scorer = scorer.model_id(), "stack ready");
        Ok(Self {
            catalog: Arc::new(catalog),
            vectors: Arc::new(vectors),
            lexical: Arc::new(lexical),
            embedder,
            scorer,
            token_spans,
            settings,
        })
    }

    /// Everything in memory; one chunk store serves both retrieval paths.
    pub fn in_memory(settings: Settings, embedder: Arc<dyn Embedder>, scorer: Arc<dyn PairwiseScorer>, token_spans: Arc<dyn TokenSpans>) -> Self {
        let chunks = Arc::new(MemoryChunkStore::new(embedder.dim()));
        Self {
            catalog: Arc::new(MemoryCatalog::new()),
            vectors: chunks.clone(),
            lexical: chunks,
            embedder,
            scorer,
            token_spans,
            settings,
        }
    }

    pub fn search_service(&self) -> SearchService {
        SearchService::new(&self.settings, self.embedder.clone(), self.vectors.clone(), self.lexical.clone(), self.scorer.clone(), self.catalog.clone(), self.catalog.clone())
    }

    pub fn ingestor(&self) -> nevis_core::Result<DocumentIngestor> {
        let chunker = Chunker::new(self.settings.chunking.clone(), self.token_spans.clone())?;
        let ingestor = DocumentIngestor::new(self.catalog.clone(), self.catalog.clone(), chunker, self.embedder.clone(), self.vectors.clone(), self.lexical.clone());
        let summarizer = if self.settings.summarization.enabled {
            SummarizerState::disabled("no summarization backend is configured")
        } else {
            SummarizerState::disabled("summarization.enabled is false")
        };
        Ok(ingestor.with_summarizer(summarizer))
    }
}
