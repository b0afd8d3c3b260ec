use thiserror::Error;

use crate::types::ChunkId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Duplicate chunk id: {0}")]
    DuplicateId(ChunkId),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Semantic index unavailable (no embeddings built)")]
    SemanticIndexUnavailable,

    #[error("Embedding call timed out after {waited_ms}ms")]
    EmbeddingTimeout { waited_ms: u64 },

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Embedding store incompatible: {0}")]
    EmbeddingStoreIncompatible(String),

    #[error("Another build pass holds the lock: {0}")]
    BuildInProgress(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation failed: {0}")]
    Operation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
