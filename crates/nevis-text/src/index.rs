use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, ConstScoreQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::debug;

use nevis_core::analysis::analyze;
use nevis_core::traits::LexicalStore;
use nevis_core::trigram::Trigrams;
use nevis_core::types::{Chunk, ScopeFilter, ScoredId};
use nevis_core::{Error, Result};

use crate::tantivy_utils::{build_schema, register_tokenizers, trigram_field_value, trigram_terms};

const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Clone, Copy)]
struct Fields {
	chunk_id: Field,
	document_id: Field,
	client_id: Field,
	text: Field,
	trigrams: Field,
}

struct Inner {
	reader: IndexReader,
	writer: Mutex<IndexWriter>,
	fields: Fields,
}

/// Lexical store over a persistent tantivy index.
#[derive(Clone)]
pub struct TantivyChunkIndex {
	inner: Arc<Inner>,
}

impl TantivyChunkIndex {
	pub fn open(index_dir: &Path) -> Result<Self> {
		std::fs::create_dir_all(index_dir).map_err(Error::store)?;
		let dir = MmapDirectory::open(index_dir).map_err(Error::store)?;
		let index = Index::open_or_create(dir, build_schema()).map_err(Error::store)?;
		Self::from_index(index)
	}

	pub fn in_memory() -> Result<Self> {
		Self::from_index(Index::create_in_ram(build_schema()))
	}

	fn from_index(index: Index) -> Result<Self> {
		register_tokenizers(&index);
		let schema = index.schema();
		let field = |name: &str| schema.get_field(name).map_err(Error::store);
		let fields = Fields { chunk_id: field("chunk_id")?, document_id: field("document_id")?, client_id: field("client_id")?, text: field("text")?, trigrams: field("trigrams")? };
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into().map_err(Error::store)?;
		let writer = index.writer(WRITER_HEAP_BYTES).map_err(Error::store)?;
		Ok(Self { inner: Arc::new(Inner { reader, writer: Mutex::new(writer), fields }) })
	}

	pub fn num_chunks(&self) -> u64 {
		self.inner.reader.searcher().num_docs()
	}

	fn scoped(&self, ranking: Box<dyn Query>, scope: &ScopeFilter) -> Option<Box<dyn Query>> {
		let f = self.inner.fields;
		let filter: Box<dyn Query> = match scope {
			ScopeFilter::All => return Some(ranking),
			ScopeFilter::Client(c) => Box::new(TermQuery::new(Term::from_field_text(f.client_id, c), IndexRecordOption::Basic)),
			ScopeFilter::Documents(docs) if docs.is_empty() => return None,
			ScopeFilter::Documents(docs) => Box::new(BooleanQuery::new(
				docs.iter().map(|d| (Occur::Should, Box::new(TermQuery::new(Term::from_field_text(f.document_id, d), IndexRecordOption::Basic)) as Box<dyn Query>)).collect(),
			)),
		};
		Some(Box::new(BooleanQuery::new(vec![(Occur::Must, ranking), (Occur::Must, Box::new(ConstScoreQuery::new(filter, 0.0)))])))
	}

	fn top_ids(&self, query: &dyn Query, limit: usize) -> Result<Vec<ScoredId>> {
		let searcher = self.inner.reader.searcher();
		let top_docs = searcher.search(query, &TopDocs::with_limit(limit)).map_err(Error::store)?;
		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr).map_err(Error::store)?;
			let id = doc.get_first(self.inner.fields.chunk_id).and_then(|v| v.as_str()).unwrap_or("").to_string();
			hits.push(ScoredId::new(id, score));
		}
		Ok(hits)
	}

	async fn run<T, F>(&self, job: F) -> Result<T>
	where
		T: Send + 'static,
		F: FnOnce(TantivyChunkIndex) -> Result<T> + Send + 'static,
	{
		let this = self.clone();
		tokio::task::spawn_blocking(move || job(this)).await.map_err(Error::store)?
	}
}

#[async_trait]
impl LexicalStore for TantivyChunkIndex {
	/// Delete-by-term plus adds, made visible by a single commit.
	async fn replace_document_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
		let document_id = document_id.to_string();
		let chunks = chunks.to_vec();
		self.run(move |this| {
			let f = this.inner.fields;
			let mut writer = this.inner.writer.lock().map_err(|_| Error::Store("tantivy writer lock poisoned".into()))?;
			writer.delete_term(Term::from_field_text(f.document_id, &document_id));
			for c in &chunks {
				writer.add_document(doc!(
					f.chunk_id => c.id.clone(),
					f.document_id => c.document_id.clone(),
					f.client_id => c.client_id.clone(),
					f.text => c.content.clone(),
					f.trigrams => trigram_field_value(&c.content),
				)).map_err(Error::store)?;
			}
			writer.commit().map_err(Error::store)?;
			drop(writer);
			this.inner.reader.reload().map_err(Error::store)?;
			debug!(document_id = %document_id, chunks = chunks.len(), "replaced tantivy chunk set");
			Ok(())
		})
		.await
	}

	/// BM25 over the stemmed query terms, OR-combined.
	async fn full_text_rank(&self, query: &str, scope: &ScopeFilter, limit: usize) -> Result<Vec<ScoredId>> {
		let mut terms = analyze(query);
		terms.sort();
		terms.dedup();
		if terms.is_empty() || limit == 0 {
			return Ok(Vec::new());
		}
		let scope = scope.clone();
		self.run(move |this| {
			let text = this.inner.fields.text;
			let clauses: Vec<(Occur, Box<dyn Query>)> = terms
				.iter()
				.map(|t| (Occur::Should, Box::new(TermQuery::new(Term::from_field_text(text, t), IndexRecordOption::WithFreqs)) as Box<dyn Query>))
				.collect();
			match this.scoped(Box::new(BooleanQuery::new(clauses)), &scope) {
				Some(q) => this.top_ids(q.as_ref(), limit),
				None => Ok(Vec::new()),
			}
		})
		.await
	}

	/// Each matched trigram scores exactly 1, so the raw score is the shared
	/// trigram count; dividing by the query's trigram count gives containment.
	async fn trigram_rank(&self, query: &str, scope: &ScopeFilter, limit: usize) -> Result<Vec<ScoredId>> {
		let q = Trigrams::of(query);
		if q.is_empty() || limit == 0 {
			return Ok(Vec::new());
		}
		let total = q.len() as f32;
		let terms = trigram_terms(&q);
		let scope = scope.clone();
		self.run(move |this| {
			let field = this.inner.fields.trigrams;
			let clauses: Vec<(Occur, Box<dyn Query>)> = terms
				.iter()
				.map(|t| {
					let tq: Box<dyn Query> = Box::new(TermQuery::new(Term::from_field_text(field, t), IndexRecordOption::Basic));
					(Occur::Should, Box::new(ConstScoreQuery::new(tq, 1.0)) as Box<dyn Query>)
				})
				.collect();
			let Some(query) = this.scoped(Box::new(BooleanQuery::new(clauses)), &scope) else { return Ok(Vec::new()) };
			let hits = this.top_ids(query.as_ref(), limit)?;
			Ok(hits.into_iter().map(|h| ScoredId::new(h.id, (h.score / total).min(1.0))).collect())
		})
		.await
	}
}
