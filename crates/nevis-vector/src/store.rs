use arrow_array::builder::{FixedSizeListBuilder, Float32Builder};
use arrow_array::{Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray, UInt32Array, UInt64Array};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use nevis_core::traits::VectorStore;
use nevis_core::types::{score_desc_id_asc, Chunk, ScopeFilter, ScoredId};
use nevis_core::{Error, Result};

use crate::schema::{build_chunk_schema, VECTOR_COLUMN};
use crate::table::{ensure_table, open_db, sql_in, sql_str};

/// Extra rows fetched past `limit` so equal distances at the cutoff are decided by id.
const TIE_SLACK: usize = 16;

pub struct LanceChunkStore {
    db: Connection,
    table_name: String,
    dim: usize,
}

impl LanceChunkStore {
    pub async fn open(db_path: &Path, table_name: &str, dim: usize) -> Result<Self> {
        let db = open_db(db_path.to_string_lossy().as_ref()).await.map_err(Error::store)?;
        ensure_table(&db, table_name, build_chunk_schema(dim)).await.map_err(Error::store)?;
        info!(path = %db_path.display(), table = table_name, dim, "opened LanceDB chunk table");
        Ok(Self { db, table_name: table_name.to_string(), dim })
    }

    async fn table(&self) -> Result<Table> {
        self.db.open_table(&self.table_name).execute().await.map_err(Error::store)
    }

    pub async fn count(&self) -> Result<usize> {
        self.table().await?.count_rows(None).await.map_err(Error::store)
    }

    fn chunks_to_batch(&self, chunks: &[Chunk]) -> Result<RecordBatch> {
        let mut vectors = FixedSizeListBuilder::new(Float32Builder::new(), self.dim as i32);
        for c in chunks {
            vectors.values().append_slice(&c.embedding);
            vectors.append(true);
        }
        let vectors: ArrayRef = Arc::new(vectors.finish());
        RecordBatch::try_new(
            build_chunk_schema(self.dim),
            vec![
                Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.id.as_str()))),
                Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.document_id.as_str()))),
                Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.client_id.as_str()))),
                Arc::new(UInt32Array::from_iter_values(chunks.iter().map(|c| c.chunk_index as u32))),
                Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.content.as_str()))),
                Arc::new(UInt64Array::from_iter_values(chunks.iter().map(|c| c.start as u64))),
                Arc::new(UInt64Array::from_iter_values(chunks.iter().map(|c| c.end as u64))),
                Arc::new(UInt32Array::from_iter_values(chunks.iter().map(|c| c.token_count as u32))),
                Arc::new(UInt32Array::from_iter_values(chunks.iter().map(|c| c.overlap_tokens as u32))),
                Arc::new(UInt64Array::from_iter_values(chunks.iter().map(|c| c.novel_offset as u64))),
                vectors,
            ],
        )
        .map_err(Error::store)
    }
}

fn scope_filter(scope: &ScopeFilter) -> Option<String> {
    match scope {
        ScopeFilter::All => None,
        ScopeFilter::Client(c) => Some(format!("client_id = {}", sql_str(c))),
        ScopeFilter::Documents(docs) => Some(sql_in("document_id", docs)),
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::Store(format!("column {name} missing or mistyped")))
}

fn batch_to_chunks(batch: &RecordBatch) -> Result<Vec<Chunk>> {
    let ids = column::<StringArray>(batch, "id")?;
    let doc_ids = column::<StringArray>(batch, "document_id")?;
    let client_ids = column::<StringArray>(batch, "client_id")?;
    let indices = column::<UInt32Array>(batch, "chunk_index")?;
    let contents = column::<StringArray>(batch, "content")?;
    let starts = column::<UInt64Array>(batch, "start_byte")?;
    let ends = column::<UInt64Array>(batch, "end_byte")?;
    let tokens = column::<UInt32Array>(batch, "token_count")?;
    let overlaps = column::<UInt32Array>(batch, "overlap_tokens")?;
    let novel = column::<UInt64Array>(batch, "novel_offset")?;
    let vectors = column::<FixedSizeListArray>(batch, VECTOR_COLUMN)?;

    let mut chunks = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let values = vectors.value(i);
        let embedding = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .map(|a| a.values().to_vec())
            .ok_or_else(|| Error::Store("vector column is not float32".into()))?;
        chunks.push(Chunk {
            id: ids.value(i).to_string(),
            document_id: doc_ids.value(i).to_string(),
            client_id: client_ids.value(i).to_string(),
            chunk_index: indices.value(i) as usize,
            content: contents.value(i).to_string(),
            start: starts.value(i) as usize,
            end: ends.value(i) as usize,
            token_count: tokens.value(i) as usize,
            overlap_tokens: overlaps.value(i) as usize,
            novel_offset: novel.value(i) as usize,
            embedding,
        });
    }
    Ok(chunks)
}

#[async_trait]
impl VectorStore for LanceChunkStore {
    fn dim(&self) -> usize {
        self.dim
    }

    /// One `merge_insert` keyed on `id`: rows of this document missing from
    /// `chunks` are deleted in the same commit.
    async fn replace_document_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != self.dim) {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: bad.embedding.len() });
        }
        if chunks.iter().any(|c| c.document_id != document_id) {
            return Err(Error::InvalidArgument(format!("all chunks must belong to {document_id}")));
        }
        let table = self.table().await?;
        let doc_filter = format!("document_id = {}", sql_str(document_id));
        if chunks.is_empty() {
            table.delete(&doc_filter).await.map_err(Error::store)?;
            return Ok(());
        }
        let batch = self.chunks_to_batch(chunks)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        let mut mi = table.merge_insert(&["id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all().when_not_matched_by_source_delete(Some(doc_filter));
        mi.execute(reader).await.map_err(Error::store)?;
        debug!(document_id, chunks = chunks.len(), "replaced LanceDB chunk set");
        Ok(())
    }

    async fn nearest(&self, query: &[f32], scope: &ScopeFilter, limit: usize) -> Result<Vec<ScoredId>> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: query.len() });
        }
        if limit == 0 || matches!(scope, ScopeFilter::Documents(d) if d.is_empty()) {
            return Ok(Vec::new());
        }
        let table = self.table().await?;
        let mut q = table.vector_search(query.to_vec()).map_err(Error::store)?.distance_type(DistanceType::Cosine).limit(limit.saturating_add(TIE_SLACK));
        if let Some(filter) = scope_filter(scope) {
            q = q.only_if(filter);
        }
        let mut stream = q.execute().await.map_err(Error::store)?;
        let mut hits = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::store)? {
            let ids = column::<StringArray>(&batch, "id")?;
            let distances = column::<Float32Array>(&batch, "_distance")?;
            for i in 0..batch.num_rows() {
                hits.push(ScoredId::new(ids.value(i), 1.0 - distances.value(i)));
            }
        }
        hits.sort_by(|a, b| score_desc_id_asc((&a.id, a.score), (&b.id, b.score)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn fetch_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let table = self.table().await?;
        let mut stream = table.query().only_if(sql_in("id", ids)).limit(ids.len()).execute().await.map_err(Error::store)?;
        let mut found = std::collections::HashMap::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::store)? {
            for c in batch_to_chunks(&batch)? {
                found.insert(c.id.clone(), c);
            }
        }
        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }
}
