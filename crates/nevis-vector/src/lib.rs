//! nevis-vector
//!
//! LanceDB-backed chunk store: one table of chunks with a fixed-size
//! embedding column, cosine nearest-neighbour search and per-document
//! atomic replacement.
pub mod schema;
pub mod store;
pub mod table;

pub use store::LanceChunkStore;
