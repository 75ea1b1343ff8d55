//! Restart and recovery against a real RocksDB store.

use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use e2e_tests::{hit_paths, search_text, TestHarness};
use vecsync_storage::{DurableStore, MemoryStore, RocksStore};
use vecsync_engine::SyncEngine;
use vecsync_types::{FileEvent, PathState};

fn rocks(path: &Path) -> Arc<dyn DurableStore> {
    Arc::new(RocksStore::open(path).expect("Failed to open RocksDB"))
}

#[tokio::test]
async fn test_restart_restores_index_from_snapshot() {
    let harness = TestHarness::new();
    let db = harness.root().join("db");
    let a = harness.write("a.txt", "alpha beta");
    let b = harness.write("notes/b.txt", "gamma delta");

    let generation = {
        let engine = harness.open_with(rocks(&db)).await;
        engine.wait_idle().await;
        assert_eq!(engine.status().documents, 2);
        // Nothing snapshotted yet: commits live only in the log
        let stats = engine.storage_stats().unwrap();
        assert_eq!(stats.snapshot_generation, None);
        assert_eq!(stats.log_records, 2);

        let generation = engine.status().generation;
        engine.shutdown().await.unwrap();
        generation
    };

    let engine = harness.open_with(rocks(&db)).await;
    engine.wait_idle().await;

    let report = engine.load_report().clone();
    assert_eq!(report.snapshot_generation, Some(generation));
    assert_eq!(report.replayed, 0);
    assert_eq!(report.generation, generation);

    // Unchanged files are not re-embedded after restart
    let status = engine.status();
    assert_eq!(status.generation, generation);
    assert_eq!(status.state_of(&a), Some(PathState::Indexed));
    assert_eq!(status.state_of(&b), Some(PathState::Indexed));
    assert_eq!(hit_paths(&search_text(&engine, "alpha", 5).await), vec![a]);
    assert_eq!(hit_paths(&search_text(&engine, "delta", 5).await), vec![b]);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_changes_while_stopped_are_reconciled_on_open() {
    let harness = TestHarness::new();
    let db = harness.root().join("db");
    let a = harness.write("a.txt", "alpha beta");
    let b = harness.write("b.txt", "gamma delta");

    {
        let engine = harness.open_with(rocks(&db)).await;
        engine.wait_idle().await;
        engine.shutdown().await.unwrap();
    }

    harness.remove("b.txt");
    harness.write("a.txt", "epsilon zeta");
    let c = harness.write("c.txt", "theta iota");

    let engine = harness.open_with(rocks(&db)).await;
    engine.wait_idle().await;

    let status = engine.status();
    assert_eq!(status.documents, 2);
    assert_eq!(status.state_of(&b), Some(PathState::Deleted));
    assert_eq!(status.state_of(&c), Some(PathState::Indexed));
    assert!(search_text(&engine, "gamma", 5).await.is_empty());
    assert!(search_text(&engine, "alpha", 5).await.is_empty());
    assert_eq!(hit_paths(&search_text(&engine, "epsilon", 5).await), vec![a]);
    assert_eq!(hit_paths(&search_text(&engine, "theta", 5).await), vec![c]);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_path_stays_visible_after_restart() {
    let harness = TestHarness::new();
    let db = harness.root().join("db");
    let good = harness.write("good.txt", "alpha beta");
    // A directory with a text extension: every read attempt errors
    let broken = harness.path("broken.txt");
    std::fs::create_dir(&broken).unwrap();

    {
        let engine = harness.open_with(rocks(&db)).await;
        engine.wait_idle().await;
        engine.submit(FileEvent::created(&broken)).await.unwrap();
        engine.wait_idle().await;
        assert_eq!(engine.status().state_of(&broken), Some(PathState::Failed));
        engine.shutdown().await.unwrap();
    }

    let engine = harness.open_with(rocks(&db)).await;
    engine.wait_idle().await;
    let status = engine.status();
    assert_eq!(status.state_of(&good), Some(PathState::Indexed));
    assert_eq!(status.state_of(&broken), Some(PathState::Failed));
    let entry = &status.paths[&broken];
    assert_eq!(entry.attempts, harness.settings.reconciler.max_attempts);
    assert!(entry.last_error.is_some());
    engine.shutdown().await.unwrap();

    // A separate read-only view sees the same failure
    let viewer = SyncEngine::open_read_only(harness.settings.clone())
        .await
        .unwrap();
    assert_eq!(viewer.status().state_of(&broken), Some(PathState::Failed));
    viewer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_log_tail_is_replayed_on_top_of_snapshot() {
    let mut harness = TestHarness::new();
    harness.settings.persistence.snapshot_every = 2;
    let store = Arc::new(MemoryStore::new());

    for name in ["a.txt", "b.txt", "c.txt"] {
        harness.write(name, &format!("{} body", name.replace('.', "")));
    }
    let generation = {
        let engine = harness.open_with(store.clone()).await;
        engine.wait_idle().await;
        let stats = engine.storage_stats().unwrap();
        // Two commits were snapshotted, the third is only in the log
        assert_eq!(stats.snapshot_generation, Some(2));
        assert_eq!(stats.log_records, 1);
        engine.status().generation
    };
    assert_eq!(generation, 3);

    let engine = harness.open_with(store).await;
    engine.wait_idle().await;
    let report = engine.load_report().clone();
    assert_eq!(report.snapshot_generation, Some(2));
    assert_eq!(report.replayed, 1);
    assert_eq!(report.generation, 3);
    assert_eq!(engine.status().documents, 3);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_snapshot_rebuilds_from_watch_folders() {
    let harness = TestHarness::new();
    let store = Arc::new(MemoryStore::new());
    store.save_snapshot(4, b"not a snapshot").unwrap();
    let a = harness.write("a.txt", "alpha beta");

    let engine = harness.open_with(store.clone()).await;
    engine.wait_idle().await;

    assert_eq!(engine.load_report().generation, 0);
    assert_eq!(engine.status().state_of(&a), Some(PathState::Indexed));
    assert_eq!(hit_paths(&search_text(&engine, "alpha", 5).await), vec![a]);

    engine.shutdown().await.unwrap();
}
