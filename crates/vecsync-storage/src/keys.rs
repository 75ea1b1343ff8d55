//! Key encoding and decoding for storage layer.
//!
//! Log keys are `log:{generation:020}`; zero padding makes lexicographic
//! order equal commit order, so a forward scan replays the log.

use crate::error::StorageError;

/// Key of the one snapshot blob
pub const SNAPSHOT_KEY: &[u8] = b"snapshot:current";

/// Meta key holding the generation of the stored snapshot
pub const SNAPSHOT_GENERATION_KEY: &[u8] = b"meta:snapshot_generation";

/// Key for commit log records
/// Format: log:{generation:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogKey {
    /// Generation produced by the commit
    pub generation: u64,
}

impl LogKey {
    pub fn new(generation: u64) -> Self {
        Self { generation }
    }

    /// Encode key to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("log:{:020}", self.generation).into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;

        let generation = s
            .strip_prefix("log:")
            .ok_or_else(|| StorageError::Key(format!("Invalid log key format: {}", s)))?
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid generation: {}", e)))?;

        Ok(Self { generation })
    }
}
