//! Agent error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Database error: {0}")]
    Database(#[from] kgrag_db::DbError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transient service failure: {0}")]
    Transient(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl AgentError {
    /// Whether a retry with backoff is worth attempting.
    ///
    /// Malformed arguments and budget exhaustion are never retried; they
    /// are surfaced to the caller (or the model) instead.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AgentError::Transient(_) | AgentError::Http(_) | AgentError::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
