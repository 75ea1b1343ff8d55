//! Embedding error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during embedding operations.
///
/// `Clone` because a failed batch reports the same error to every caller
/// whose texts were part of it.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    /// Backend could not be reached or returned a failure status
    #[error("Embedding backend unavailable: {0}")]
    Unavailable(String),

    /// Backend did not answer within the configured bound
    #[error("Embedding request timed out after {0:?}")]
    Timeout(Duration),

    /// Backend answered with something that is not a valid embedding batch
    #[error("Malformed embedding response: {0}")]
    Malformed(String),

    /// Vector width differs from the configured dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid backend configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The batching task has shut down
    #[error("Embedding pipeline closed")]
    PipelineClosed,
}

impl EmbeddingError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::Unavailable(_)
                | EmbeddingError::Timeout(_)
                | EmbeddingError::Malformed(_)
        )
    }
}
