//! The durable store interface.

use crate::error::StorageError;

/// Statistics about the storage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Generation of the stored snapshot, if any
    pub snapshot_generation: Option<u64>,
    /// Size of the snapshot blob in bytes
    pub snapshot_bytes: u64,
    /// Commit records written since the snapshot
    pub log_records: u64,
    /// Total disk usage in bytes (0 for in-memory stores)
    pub disk_usage_bytes: u64,
}

/// Persistence medium for index state: one snapshot blob plus an append-only
/// log of commit records ordered by generation.
pub trait DurableStore: Send + Sync {
    /// Current snapshot blob and its generation.
    fn load_snapshot(&self) -> Result<Option<(u64, Vec<u8>)>, StorageError>;

    /// Replace the snapshot and drop every log record at or below
    /// `generation`, atomically.
    fn save_snapshot(&self, generation: u64, blob: &[u8]) -> Result<(), StorageError>;

    /// Append the record of the commit that produced `generation`.
    fn append_log(&self, generation: u64, record: &[u8]) -> Result<(), StorageError>;

    /// Log records with generation above `after`, in generation order.
    fn read_log(&self, after: u64) -> Result<Vec<(u64, Vec<u8>)>, StorageError>;

    /// Discard the snapshot and the whole log.
    fn clear(&self) -> Result<(), StorageError>;

    /// Make prior writes durable.
    fn flush(&self) -> Result<(), StorageError>;

    fn stats(&self) -> Result<StorageStats, StorageError>;

    /// Reclaim space left behind by truncated log records and replaced
    /// snapshots. Stores without on-disk garbage keep the default.
    fn compact(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
