use thiserror::Error;

use crate::types::DocumentStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Search query cannot be empty or whitespace only")]
    EmptyQuery,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid document status transition: {from} -> {to}")]
    InvalidTransition { from: DocumentStatus, to: DocumentStatus },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{capability} capability failed: {message}")]
    Capability { capability: &'static str, message: String },

    #[error("Store operation failed: {0}")]
    Store(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn capability(capability: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Capability { capability, message: err.to_string() }
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
