//! nevis-core
//!
//! Domain types, capability and store traits, configuration, the token-exact
//! chunker and trigram similarity shared by every other crate in the
//! workspace. Nothing in here talks to a model or an on-disk index.

pub mod analysis;
pub mod chunker;
pub mod config;
pub mod error;
pub mod memory;
pub mod traits;
pub mod trigram;
pub mod types;

pub use error::{Error, Result};
