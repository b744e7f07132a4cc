//! nevis-text
//!
//! Tantivy-backed lexical chunk store: stemmed BM25 over chunk text plus a
//! trigram field for fuzzy matching. See `index` for the store and
//! `tantivy_utils` for the schema and analyzers.
pub mod index;
pub mod tantivy_utils;

pub use index::TantivyChunkIndex;
