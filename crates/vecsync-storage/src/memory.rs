//! In-process durable store.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::error::StorageError;
use crate::store::{DurableStore, StorageStats};

#[derive(Default)]
struct Inner {
    snapshot: Option<(u64, Vec<u8>)>,
    log: BTreeMap<u64, Vec<u8>>,
}

/// Store that keeps everything in memory. State lives as long as the value.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn load_snapshot(&self) -> Result<Option<(u64, Vec<u8>)>, StorageError> {
        Ok(self.inner.lock().snapshot.clone())
    }

    fn save_snapshot(&self, generation: u64, blob: &[u8]) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        inner.snapshot = Some((generation, blob.to_vec()));
        inner.log = inner.log.split_off(&(generation + 1));
        Ok(())
    }

    fn append_log(&self, generation: u64, record: &[u8]) -> Result<(), StorageError> {
        self.inner.lock().log.insert(generation, record.to_vec());
        Ok(())
    }

    fn read_log(&self, after: u64) -> Result<Vec<(u64, Vec<u8>)>, StorageError> {
        Ok(self
            .inner
            .lock()
            .log
            .range(after + 1..)
            .map(|(g, r)| (*g, r.clone()))
            .collect())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.inner.lock() = Inner::default();
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn stats(&self) -> Result<StorageStats, StorageError> {
        let inner = self.inner.lock();
        Ok(StorageStats {
            snapshot_generation: inner.snapshot.as_ref().map(|(g, _)| *g),
            snapshot_bytes: inner.snapshot.as_ref().map_or(0, |(_, b)| b.len() as u64),
            log_records: inner.log.len() as u64,
            disk_usage_bytes: 0,
        })
    }
}
