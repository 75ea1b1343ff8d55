//! RocksDB-backed durable store.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Read-only open for inspecting a store another process owns
//! - Atomic snapshot replacement plus log truncation in one write batch
//! - Ordered log replay by forward iteration

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use tracing::{debug, info};

use crate::column_families::{build_cf_descriptors, ALL_CF_NAMES, CF_COMMIT_LOG, CF_META, CF_SNAPSHOT};
use crate::error::StorageError;
use crate::keys::{LogKey, SNAPSHOT_GENERATION_KEY, SNAPSHOT_KEY};
use crate::store::{DurableStore, StorageStats};

/// Durable store on a RocksDB instance
pub struct RocksStore {
    db: DB,
    read_only: bool,
}

impl RocksStore {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())?;
        Ok(Self {
            db,
            read_only: false,
        })
    }

    /// Open an existing store without taking the write lock.
    pub fn open_read_only(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage read-only at {:?}", path);

        let db_opts = Options::default();
        let db = DB::open_cf_for_read_only(&db_opts, path, ALL_CF_NAMES.iter().copied(), false)?;
        Ok(Self {
            db,
            read_only: true,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    fn ensure_writable(&self) -> Result<(), StorageError> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        Ok(())
    }

    fn count_cf_entries(&self, cf: &rocksdb::ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        let mut total_size = 0u64;
        if let Ok(entries) = std::fs::read_dir(self.db.path()) {
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    total_size += metadata.len();
                }
            }
        }
        total_size
    }
}

fn decode_generation(bytes: &[u8]) -> Result<u64, StorageError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Key("snapshot generation must be 8 bytes".to_string()))?;
    Ok(u64::from_be_bytes(raw))
}

impl DurableStore for RocksStore {
    fn load_snapshot(&self) -> Result<Option<(u64, Vec<u8>)>, StorageError> {
        let Some(blob) = self.db.get_cf(self.cf(CF_SNAPSHOT)?, SNAPSHOT_KEY)? else {
            return Ok(None);
        };
        let generation = match self.db.get_cf(self.cf(CF_META)?, SNAPSHOT_GENERATION_KEY)? {
            Some(bytes) => decode_generation(&bytes)?,
            None => 0,
        };
        Ok(Some((generation, blob)))
    }

    fn save_snapshot(&self, generation: u64, blob: &[u8]) -> Result<(), StorageError> {
        self.ensure_writable()?;
        let log_cf = self.cf(CF_COMMIT_LOG)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_SNAPSHOT)?, SNAPSHOT_KEY, blob);
        batch.put_cf(
            self.cf(CF_META)?,
            SNAPSHOT_GENERATION_KEY,
            generation.to_be_bytes(),
        );
        // End key is exclusive
        batch.delete_range_cf(
            log_cf,
            LogKey::new(0).to_bytes(),
            LogKey::new(generation.saturating_add(1)).to_bytes(),
        );
        self.db.write(batch)?;

        debug!(generation, bytes = blob.len(), "Stored snapshot");
        Ok(())
    }

    fn append_log(&self, generation: u64, record: &[u8]) -> Result<(), StorageError> {
        self.ensure_writable()?;
        self.db.put_cf(
            self.cf(CF_COMMIT_LOG)?,
            LogKey::new(generation).to_bytes(),
            record,
        )?;
        Ok(())
    }

    fn read_log(&self, after: u64) -> Result<Vec<(u64, Vec<u8>)>, StorageError> {
        let start = LogKey::new(after.saturating_add(1)).to_bytes();
        let iter = self.db.iterator_cf(
            self.cf(CF_COMMIT_LOG)?,
            IteratorMode::From(&start, Direction::Forward),
        );

        let mut records = Vec::new();
        for item in iter {
            let (key, value) = item?;
            let key = LogKey::from_bytes(&key)?;
            records.push((key.generation, value.to_vec()));
        }
        Ok(records)
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.ensure_writable()?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_SNAPSHOT)?, SNAPSHOT_KEY);
        batch.delete_cf(self.cf(CF_META)?, SNAPSHOT_GENERATION_KEY);
        batch.delete_range_cf(
            self.cf(CF_COMMIT_LOG)?,
            LogKey::new(0).to_bytes(),
            LogKey::new(u64::MAX).to_bytes(),
        );
        // delete_range excludes the end key
        batch.delete_cf(self.cf(CF_COMMIT_LOG)?, LogKey::new(u64::MAX).to_bytes());
        self.db.write(batch)?;
        info!("Cleared persisted index state");
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        if self.read_only {
            return Ok(());
        }
        for cf_name in ALL_CF_NAMES {
            self.db.flush_cf(self.cf(cf_name)?)?;
        }
        Ok(())
    }

    fn stats(&self) -> Result<StorageStats, StorageError> {
        let snapshot = self.load_snapshot()?;
        Ok(StorageStats {
            snapshot_generation: snapshot.as_ref().map(|(g, _)| *g),
            snapshot_bytes: snapshot.as_ref().map_or(0, |(_, b)| b.len() as u64),
            log_records: self.count_cf_entries(self.cf(CF_COMMIT_LOG)?)?,
            disk_usage_bytes: self.get_disk_usage(),
        })
    }

    /// Manual compaction on all column families.
    fn compact(&self) -> Result<(), StorageError> {
        self.ensure_writable()?;
        info!("Starting storage compaction");
        for cf_name in ALL_CF_NAMES {
            let cf = self.cf(cf_name)?;
            self.db.compact_range_cf::<&[u8], &[u8]>(cf, None, None);
        }
        info!("Storage compaction complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_open_creates_column_families() {
        let (store, _temp) = create_test_store();
        for cf_name in ALL_CF_NAMES {
            assert!(
                store.db.cf_handle(cf_name).is_some(),
                "CF {} should exist",
                cf_name
            );
        }
    }

    #[test]
    fn test_empty_store() {
        let (store, _temp) = create_test_store();
        assert!(store.load_snapshot().unwrap().is_none());
        assert!(store.read_log(0).unwrap().is_empty());
        assert_eq!(store.stats().unwrap().log_records, 0);
    }

    #[test]
    fn test_log_replays_in_generation_order() {
        let (store, _temp) = create_test_store();
        for g in [3u64, 1, 12, 2] {
            store.append_log(g, format!("rec-{}", g).as_bytes()).unwrap();
        }

        let log = store.read_log(0).unwrap();
        let gens: Vec<u64> = log.iter().map(|(g, _)| *g).collect();
        assert_eq!(gens, vec![1, 2, 3, 12]);
        assert_eq!(log[3].1, b"rec-12".to_vec());

        let tail: Vec<u64> = store.read_log(2).unwrap().iter().map(|(g, _)| *g).collect();
        assert_eq!(tail, vec![3, 12]);
    }

    #[test]
    fn test_snapshot_truncates_covered_log() {
        let (store, _temp) = create_test_store();
        for g in 1..=6 {
            store.append_log(g, b"r").unwrap();
        }
        store.save_snapshot(4, b"snapshot-4").unwrap();

        assert_eq!(
            store.load_snapshot().unwrap(),
            Some((4, b"snapshot-4".to_vec()))
        );
        let gens: Vec<u64> = store.read_log(0).unwrap().iter().map(|(g, _)| *g).collect();
        assert_eq!(gens, vec![5, 6]);

        let stats = store.stats().unwrap();
        assert_eq!(stats.snapshot_generation, Some(4));
        assert_eq!(stats.log_records, 2);
    }

    #[test]
    fn test_state_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksStore::open(temp_dir.path()).unwrap();
            store.save_snapshot(2, b"snap").unwrap();
            store.append_log(3, b"three").unwrap();
            store.flush().unwrap();
        }

        let store = RocksStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.load_snapshot().unwrap(), Some((2, b"snap".to_vec())));
        assert_eq!(store.read_log(2).unwrap(), vec![(3, b"three".to_vec())]);
    }

    #[test]
    fn test_read_only_open() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksStore::open(temp_dir.path()).unwrap();
            store.save_snapshot(1, b"snap").unwrap();
            store.flush().unwrap();
        }

        let store = RocksStore::open_read_only(temp_dir.path()).unwrap();
        assert!(store.is_read_only());
        assert_eq!(store.load_snapshot().unwrap(), Some((1, b"snap".to_vec())));
        assert!(matches!(
            store.append_log(2, b"x"),
            Err(StorageError::ReadOnly)
        ));
    }

    #[test]
    fn test_clear_discards_everything() {
        let (store, _temp) = create_test_store();
        store.save_snapshot(1, b"snap").unwrap();
        store.append_log(2, b"r").unwrap();
        store.clear().unwrap();

        assert!(store.load_snapshot().unwrap().is_none());
        assert!(store.read_log(0).unwrap().is_empty());
    }

    #[test]
    fn test_compact_keeps_contents() {
        let (store, _temp) = create_test_store();
        for g in 1..=20u64 {
            store.append_log(g, &[g as u8; 64]).unwrap();
        }
        store.save_snapshot(15, b"snap").unwrap();
        store.compact().unwrap();

        assert_eq!(store.load_snapshot().unwrap(), Some((15, b"snap".to_vec())));
        let tail: Vec<u64> = store.read_log(15).unwrap().into_iter().map(|(g, _)| g).collect();
        assert_eq!(tail, (16..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_compact_rejected_when_read_only() {
        let temp_dir = TempDir::new().unwrap();
        drop(RocksStore::open(temp_dir.path()).unwrap());
        let store = RocksStore::open_read_only(temp_dir.path()).unwrap();
        assert!(matches!(store.compact(), Err(StorageError::ReadOnly)));
    }
}
