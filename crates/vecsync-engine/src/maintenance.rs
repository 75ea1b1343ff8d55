//! Background compaction and snapshot loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use vecsync_types::CompactionSettings;

use crate::coordinator::Coordinator;

/// Periodically compacts when the tombstone trigger fires and snapshots
/// any commits still only in the log.
pub fn spawn_maintenance(
    coordinator: Arc<Coordinator>,
    settings: CompactionSettings,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let period = Duration::from_secs(settings.check_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // First tick fires immediately
        interval.tick().await;
        info!(period_secs = period.as_secs(), "Maintenance loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => run_once(&coordinator, &settings).await,
            }
        }
        info!("Maintenance loop stopped");
    })
}

/// One maintenance pass.
pub async fn run_once(coordinator: &Coordinator, settings: &CompactionSettings) {
    if coordinator.should_compact(settings) {
        match coordinator.compact().await {
            Ok(report) => debug!(reclaimed = report.reclaimed, "Scheduled compaction finished"),
            Err(e) => error!(error = %e, "Scheduled compaction failed"),
        }
    }
    match coordinator.snapshot_if_dirty().await {
        Ok(Some(generation)) => debug!(generation, "Scheduled snapshot written"),
        Ok(None) => {}
        Err(e) => error!(error = %e, "Scheduled snapshot failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::Persistence;
    use crate::state::{CommitBatch, IndexState, PreparedChunk, RemovalReason};
    use std::path::Path;
    use vecsync_index::HnswConfig;
    use vecsync_storage::{DurableStore, MemoryStore};
    use vecsync_types::DistanceMetric;

    async fn seeded(store: Arc<MemoryStore>) -> Arc<Coordinator> {
        let state = IndexState::new(HnswConfig::new(2, DistanceMetric::Euclidean));
        let c = Arc::new(Coordinator::new(state, Persistence::new(store), 0));
        for (i, name) in ["/a.txt", "/b.txt", "/c.txt"].iter().enumerate() {
            let seq = c.sequences().assign(Path::new(name));
            let chunk = PreparedChunk {
                offset: 0,
                start: 0,
                end: 1,
                vector: vec![i as f32, 1.0],
            };
            c.commit(seq, CommitBatch::replace(*name, "h", None, vec![chunk]))
                .await
                .unwrap();
        }
        for name in ["/a.txt", "/b.txt"] {
            let seq = c.sequences().assign(Path::new(name));
            c.commit(seq, CommitBatch::remove(name, RemovalReason::Deleted))
                .await
                .unwrap();
        }
        c
    }

    #[tokio::test]
    async fn test_run_once_compacts_past_threshold() {
        let store = Arc::new(MemoryStore::new());
        let c = seeded(store.clone()).await;
        let settings = CompactionSettings {
            tombstone_ratio: 0.5,
            min_tombstones: 1,
            check_interval_secs: 1,
        };
        run_once(&c, &settings).await;

        assert_eq!(c.read(|s| s.tombstone_count()), 0);
        assert_eq!(c.read(|s| s.total_nodes()), 1);
        assert_eq!(store.stats().unwrap().log_records, 0);
    }

    #[tokio::test]
    async fn test_run_once_below_threshold_only_snapshots() {
        let store = Arc::new(MemoryStore::new());
        let c = seeded(store.clone()).await;
        let settings = CompactionSettings {
            tombstone_ratio: 0.9,
            min_tombstones: 1,
            check_interval_secs: 1,
        };
        run_once(&c, &settings).await;

        assert_eq!(c.read(|s| s.tombstone_count()), 2);
        assert_eq!(store.stats().unwrap().snapshot_generation, Some(5));
        assert_eq!(store.stats().unwrap().log_records, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_on_cancel() {
        let c = seeded(Arc::new(MemoryStore::new())).await;
        let cancel = CancellationToken::new();
        let task = spawn_maintenance(c, CompactionSettings::default(), cancel.clone());
        tokio::time::sleep(Duration::from_secs(120)).await;
        cancel.cancel();
        task.await.unwrap();
    }
}
