//! nevis-hybrid
//!
//! The query and ingest pipelines: vector and lexical chunk retrieval, rank
//! fusion, pairwise reranking, client fuzzy matching, the search
//! orchestrator, the document ingestor, and retrieval-quality metrics.
pub mod cancel;
pub mod client_match;
pub mod eval;
pub mod fusion;
pub mod ingest;
pub mod rerank;
pub mod retrieval;
pub mod search;
pub mod stack;

pub use cancel::{CancelFlag, CancelOnDrop};
pub use client_match::ClientMatcher;
pub use fusion::fuse;
pub use ingest::DocumentIngestor;
pub use rerank::{Candidate, RerankerFilter};
pub use retrieval::{LexicalRetriever, VectorRetriever};
pub use search::SearchService;
pub use stack::Stack;
