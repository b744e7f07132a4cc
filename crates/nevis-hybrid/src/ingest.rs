//! Document ingestion: chunk, embed, optionally summarize, then swap the
//! document's chunk set in both stores and drive its status.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use nevis_core::chunker::Chunker;
use nevis_core::traits::{ClientStore, DocumentStore, Embedder, LexicalStore, SummarizerState, VectorStore};
use nevis_core::types::{Chunk, Document, DocumentId, DocumentStatus};
use nevis_core::{Error, Result};

pub struct DocumentIngestor {
    clients: Arc<dyn ClientStore>,
    documents: Arc<dyn DocumentStore>,
    chunker: Arc<Chunker>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    lexical: Arc<dyn LexicalStore>,
    summarizer: SummarizerState,
    locks: Mutex<HashMap<DocumentId, Arc<tokio::sync::Mutex<()>>>>,
}

impl DocumentIngestor {
    pub fn new(
        clients: Arc<dyn ClientStore>,
        documents: Arc<dyn DocumentStore>,
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        lexical: Arc<dyn LexicalStore>,
    ) -> Self {
        Self {
            clients,
            documents,
            chunker: Arc::new(chunker),
            embedder,
            vectors,
            lexical,
            summarizer: SummarizerState::disabled("summarization.enabled is false"),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_summarizer(mut self, summarizer: SummarizerState) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn summarizer(&self) -> &SummarizerState {
        &self.summarizer
    }

    fn lock_for(&self, document_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| Error::Store("ingest lock table poisoned".into()))?;
        Ok(locks.entry(document_id.to_string()).or_default().clone())
    }

    /// Creates a PENDING document for an existing client and ingests `text`.
    pub async fn upload(&self, client_id: &str, title: &str, text: &str) -> Result<Document> {
        if self.clients.client(client_id).await?.is_none() {
            return Err(Error::NotFound(format!("client {client_id}")));
        }
        let document = Document::new(client_id, title);
        self.documents.insert_document(document.clone()).await?;
        info!(document_id = %document.id, client_id, title, "document uploaded");
        self.ingest(&document.id, text).await
    }

    /// Moves a PROCESSED or FAILED document back to PENDING.
    pub async fn request_reprocessing(&self, document_id: &DocumentId) -> Result<Document> {
        let lock = self.lock_for(document_id)?;
        let _guard = lock.lock().await;
        let document = self.documents.update_status(document_id, DocumentStatus::Pending).await?;
        info!(document_id = %document_id, "reprocessing requested");
        Ok(document)
    }

    pub async fn reprocess(&self, document_id: &DocumentId, text: &str) -> Result<Document> {
        self.request_reprocessing(document_id).await?;
        self.ingest(document_id, text).await
    }

    /// PENDING -> PROCESSING -> PROCESSED, or FAILED with the error returned.
    pub async fn ingest(&self, document_id: &DocumentId, text: &str) -> Result<Document> {
        let lock = self.lock_for(document_id)?;
        let _guard = lock.lock().await;

        let document = self.documents.update_status(document_id, DocumentStatus::Processing).await?;
        debug!(document_id = %document_id, status = %document.status, "ingest started");
        match self.process(&document, text).await {
            Ok(chunks) => {
                let done = self.documents.update_status(document_id, DocumentStatus::Processed).await?;
                info!(document_id = %document_id, chunks, "document processed");
                Ok(done)
            }
            Err(err) => {
                warn!(document_id = %document_id, error = %err, "ingest failed");
                if let Err(mark) = self.documents.update_status(document_id, DocumentStatus::Failed).await {
                    warn!(document_id = %document_id, error = %mark, "could not mark document failed");
                }
                Err(err)
            }
        }
    }

    async fn process(&self, document: &Document, text: &str) -> Result<usize> {
        let chunker = self.chunker.clone();
        let owned = text.to_string();
        let pieces = tokio::task::spawn_blocking(move || chunker.chunk(&owned)).await.map_err(Error::store)??;

        let embeddings = if pieces.is_empty() {
            Vec::new()
        } else {
            let embedder = self.embedder.clone();
            let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
            tokio::task::spawn_blocking(move || embedder.embed_batch(&texts)).await.map_err(|e| Error::capability("embedding", e))??
        };
        if embeddings.len() != pieces.len() {
            return Err(Error::capability("embedding", format!("expected {} vectors, got {}", pieces.len(), embeddings.len())));
        }
        let dim = self.vectors.dim();
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dim) {
            return Err(Error::DimensionMismatch { expected: dim, actual: bad.len() });
        }

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .zip(embeddings)
            .map(|(p, embedding)| Chunk {
                id: Chunk::make_id(&document.id, p.index),
                document_id: document.id.clone(),
                client_id: document.client_id.clone(),
                chunk_index: p.index,
                content: p.text,
                start: p.start,
                end: p.end,
                token_count: p.token_count,
                overlap_tokens: p.overlap_tokens,
                novel_offset: p.novel_offset,
                embedding,
            })
            .collect();

        self.summarize(document, text).await?;

        let written = match self.vectors.replace_document_chunks(&document.id, &chunks).await {
            Ok(()) => self.lexical.replace_document_chunks(&document.id, &chunks).await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            self.clear_chunks(&document.id).await;
            return Err(err);
        }
        Ok(chunks.len())
    }

    /// Drops every chunk of the document from both stores. Failures are logged only.
    async fn clear_chunks(&self, document_id: &DocumentId) {
        if let Err(err) = self.vectors.replace_document_chunks(document_id, &[]).await {
            warn!(document_id = %document_id, error = %err, "vector rollback failed");
        }
        if let Err(err) = self.lexical.replace_document_chunks(document_id, &[]).await {
            warn!(document_id = %document_id, error = %err, "lexical rollback failed");
        }
    }

    /// A failing summarizer is logged and skipped; the document still ingests.
    async fn summarize(&self, document: &Document, text: &str) -> Result<()> {
        match &self.summarizer {
            SummarizerState::Enabled(summarizer) => match summarizer.summarize(text).await {
                Ok(summary) => self.documents.set_summary(&document.id, Some(summary)).await,
                Err(err) => {
                    warn!(document_id = %document.id, error = %err, "summarization failed");
                    Ok(())
                }
            },
            SummarizerState::Disabled { reason } => {
                info!(document_id = %document.id, reason = %reason, "summarization disabled");
                Ok(())
            }
        }
    }
}
