//! Error types for the core domain

use thiserror::Error;

/// Core domain errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Community not found: {0}")]
    CommunityNotFound(i64),

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidEmbeddingDimension { expected: usize, actual: usize },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
