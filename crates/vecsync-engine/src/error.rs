//! Error types for the sync engine.

use std::path::PathBuf;

use thiserror::Error;
use vecsync_embeddings::EmbeddingError;
use vecsync_index::IndexError;
use vecsync_storage::StorageError;
use vecsync_types::ConfigError;

/// Errors raised while turning a file into text.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// No extractor handles this file type
    #[error("Unsupported file type: {0}")]
    Unsupported(PathBuf),

    /// File disappeared before it could be read
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// File exceeds the extraction size cap
    #[error("File too large: {path} is {size} bytes (limit {limit})")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    /// Content could not be decoded
    #[error("Corrupt content in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Read failed
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExtractionError {
    /// Map an I/O error for `path`, separating out a missing file.
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            ExtractionError::NotFound(path)
        } else {
            ExtractionError::Io { path, source }
        }
    }

    /// Only transient read failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractionError::Io { .. })
    }
}

/// Errors that can occur in the sync engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// File could not be extracted
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// Embedding backend failed
    #[error("Model error: {0}")]
    Model(#[from] EmbeddingError),

    /// Graph or allocator operation failed
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Durable store failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Persisted state violates an invariant
    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    /// Snapshot or log record encoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The engine is shutting down or a background task is gone
    #[error("Engine is shut down")]
    Shutdown,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for EngineError {
    fn from(err: bincode::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl EngineError {
    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Extraction(e) => e.is_retryable(),
            EngineError::Model(e) => e.is_retryable(),
            EngineError::Storage(e) => e.is_transient(),
            EngineError::Io(_) => true,
            _ => false,
        }
    }

    /// Whether the error means the file no longer exists.
    pub fn is_not_found(&self) -> bool {
        match self {
            EngineError::Extraction(ExtractionError::NotFound(_)) => true,
            EngineError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = EngineError::IndexCorruption("dangling chunk /a#0".to_string());
        assert_eq!(err.to_string(), "Index corruption: dangling chunk /a#0");

        let err = ExtractionError::Unsupported(PathBuf::from("/a/b.bin"));
        assert_eq!(err.to_string(), "Unsupported file type: /a/b.bin");
    }

    #[test]
    fn test_retry_classification() {
        let model: EngineError = EmbeddingError::Timeout(Duration::from_secs(1)).into();
        assert!(model.is_retryable());

        let unsupported: EngineError = ExtractionError::Unsupported("/x.bin".into()).into();
        assert!(!unsupported.is_retryable());

        let io = ExtractionError::from_io(
            "/x.txt",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(io.is_retryable());

        let corrupt = EngineError::IndexCorruption("x".into());
        assert!(!corrupt.is_retryable());

        let read_only: EngineError = StorageError::ReadOnly.into();
        assert!(!read_only.is_retryable());
    }

    #[test]
    fn test_not_found_detection() {
        let missing = ExtractionError::from_io(
            "/gone.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(missing, ExtractionError::NotFound(_)));
        assert!(EngineError::from(missing).is_not_found());
    }
}
