//! Storage layer error types.

use thiserror::Error;

/// Errors raised by a durable store
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Column family missing from an opened database
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Log key or snapshot metadata could not be decoded
    #[error("Key error: {0}")]
    Key(String),

    /// Write attempted on a store opened read-only
    #[error("Store is read-only")]
    ReadOnly,
}

impl StorageError {
    /// Whether repeating the operation may succeed. Layout and mode errors
    /// are permanent for the lifetime of the open store.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::RocksDb(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(!StorageError::ReadOnly.is_transient());
        assert!(!StorageError::Key("short".into()).is_transient());
        assert!(!StorageError::ColumnFamilyNotFound("snapshot".into()).is_transient());
    }
}
