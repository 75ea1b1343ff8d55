//! Command implementations for the vecsync daemon.
//!
//! Handles:
//! - start: Load config, open the engine, watch folders until SIGINT/SIGTERM
//! - sync: Reconcile once, wait for the queue to drain, snapshot and exit
//! - search/status: Open the store read-only and print results
//! - compact: Rebuild the graph without tombstoned nodes

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;

use vecsync_engine::{
    extract::decode_text, PathFilter, SearchHit, SearchRequest, SearchResponse, StatusReport,
    SyncEngine,
};
use vecsync_types::{PathState, Settings};
use vecsync_watch::{FolderWatcher, WatcherConfig};

const SNIPPET_CHARS: usize = 160;

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub config: Option<String>,
    pub db_path: Option<String>,
    pub log_level: Option<String>,
}

/// Load settings, apply CLI overrides and install the tracing subscriber.
fn prepare(args: &GlobalArgs, watch: &[String]) -> Result<Settings> {
    let settings = load_settings(args, watch)?;
    init_logging(&settings)?;
    Ok(settings)
}

/// Layered settings with CLI flags on top. `watch`, when non-empty, replaces
/// the configured watch folders.
pub fn load_settings(args: &GlobalArgs, watch: &[String]) -> Result<Settings> {
    let mut settings =
        Settings::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(db_path) = &args.db_path {
        settings.db_path = db_path.clone();
    }
    if let Some(log_level) = &args.log_level {
        settings.log_level = log_level.clone();
    }
    if !watch.is_empty() {
        settings.watch_folders = watch
            .iter()
            .map(|w| absolute(Path::new(w)).map(|p| p.to_string_lossy().into_owned()))
            .collect::<Result<_>>()?;
    }
    Ok(settings)
}

fn init_logging(settings: &Settings) -> Result<()> {
    // Logs go to stderr so search/status output can be piped
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;
    #[cfg(unix)]
    let terminate = sigterm.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        res = signal::ctrl_c() => {
            res.context("Failed to install Ctrl+C handler")?;
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
    Ok(())
}

/// Run the daemon: watch folders and keep the index in sync until signalled.
///
/// The watcher is started before the engine's initial scan so that changes
/// made during the scan are queued rather than missed.
pub async fn start_daemon(args: &GlobalArgs, watch: &[String]) -> Result<()> {
    let settings = prepare(args, watch)?;
    if settings.watch_folders.is_empty() {
        anyhow::bail!("No watch folders configured; pass --watch or set watch_folders");
    }

    info!("vecsync daemon starting...");
    info!("Configuration:");
    info!("  Database path: {}", settings.db_path);
    info!("  Watch folders: {:?}", settings.watch_folders);
    info!("  Model: {:?} ({} dims)", settings.embedding.provider, settings.embedding.dimension);
    info!("  Log level: {}", settings.log_level);

    let (tx, rx) = mpsc::channel(settings.reconciler.queue_capacity);
    let watcher = FolderWatcher::start(WatcherConfig::from_settings(&settings), tx)
        .context("Failed to start folder watcher")?;

    let engine = SyncEngine::open(settings)
        .await
        .context("Failed to open sync engine")?;
    engine
        .attach_source(rx)
        .context("Failed to attach watcher to engine")?;
    info!(roots = ?watcher.roots(), "Watching for changes");

    let signalled = shutdown_signal().await;

    drop(watcher);
    engine
        .shutdown()
        .await
        .context("Failed to shut down sync engine")?;
    signalled
}

/// Reconcile once and exit. With no `paths` every watch folder is rescanned;
/// otherwise only the given files and folders are reindexed.
pub async fn sync_once(args: &GlobalArgs, paths: &[String], watch: &[String]) -> Result<()> {
    let settings = prepare(args, watch)?;

    let engine = if paths.is_empty() {
        SyncEngine::open(settings)
            .await
            .context("Failed to open sync engine")?
    } else {
        let targets = paths
            .iter()
            .map(|p| absolute(Path::new(p)))
            .collect::<Result<Vec<_>>>()?;
        let engine = SyncEngine::open_without_scan(settings)
            .await
            .context("Failed to open sync engine")?;
        engine
            .reindex(Some(targets))
            .await
            .context("Failed to queue reindex")?;
        engine
    };

    engine.wait_idle().await;
    let report = engine.status();
    engine
        .shutdown()
        .await
        .context("Failed to shut down sync engine")?;

    println!(
        "Synced: {} indexed, {} deleted, {} failed ({} live chunks, generation {})",
        report.count(PathState::Indexed),
        report.count(PathState::Deleted),
        report.count(PathState::Failed),
        report.live_chunks,
        report.generation
    );
    for (path, status) in &report.paths {
        if status.state == PathState::Failed {
            println!(
                "  failed: {} ({})",
                path.display(),
                status.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    Ok(())
}

async fn open_existing(settings: Settings) -> Result<SyncEngine> {
    let db_path = settings.expanded_db_path();
    SyncEngine::open_read_only(settings).await.with_context(|| {
        format!(
            "Failed to open index at {:?}; run `vecsync-daemon sync` first",
            db_path
        )
    })
}

/// Query the index and print ranked hits.
pub async fn run_search(
    args: &GlobalArgs,
    query: &str,
    k: Option<usize>,
    prefix: Option<&str>,
    min_score: Option<f32>,
    json: bool,
) -> Result<()> {
    let settings = prepare(args, &[])?;
    let engine = open_existing(settings).await?;

    let mut request = SearchRequest::text(query);
    if let Some(k) = k {
        request = request.with_k(k);
    }
    if let Some(prefix) = prefix {
        request = request.with_filter(PathFilter::prefix(absolute(Path::new(prefix))?));
    }
    if let Some(min_score) = min_score {
        request = request.with_min_score(min_score);
    }

    let response = engine.search(request).await.context("Search failed")?;
    engine.shutdown().await.context("Failed to close index")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_hits(&response);
    }
    Ok(())
}

fn print_hits(response: &SearchResponse) {
    if response.is_empty() {
        println!("No results (generation {})", response.generation);
        return;
    }
    for (rank, hit) in response.hits.iter().enumerate() {
        println!(
            "{:>2}. {:.4}  {}#{}",
            rank + 1,
            hit.score,
            hit.path.display(),
            hit.offset
        );
        if let Some(snippet) = snippet(hit) {
            println!("    {}", snippet);
        }
    }
}

/// Chunk text re-read from disk; `None` if the file changed or vanished.
fn snippet(hit: &SearchHit) -> Option<String> {
    let bytes = std::fs::read(&hit.path).ok()?;
    let text = decode_text(&bytes);
    Some(condense(text.get(hit.start..hit.end)?, SNIPPET_CHARS))
}

/// Collapse whitespace runs and cut to `max_chars`.
fn condense(text: &str, max_chars: usize) -> String {
    let joined = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if joined.chars().count() <= max_chars {
        return joined;
    }
    let mut cut: String = joined.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Print index and per-path status.
pub async fn show_status(args: &GlobalArgs, json: bool) -> Result<()> {
    let settings = prepare(args, &[])?;
    let engine = open_existing(settings).await?;
    let report = engine.status();
    let stats = engine.storage_stats().context("Failed to read storage stats")?;
    engine.shutdown().await.context("Failed to close index")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_report(&report);
    println!(
        "Storage: snapshot at generation {}, {} log records, {} bytes on disk",
        stats
            .snapshot_generation
            .map_or_else(|| "-".to_string(), |g| g.to_string()),
        stats.log_records,
        stats.disk_usage_bytes
    );
    Ok(())
}

fn print_report(report: &StatusReport) {
    println!(
        "Index: {} documents, {} live chunks, {} tombstones ({:.1}%)",
        report.documents,
        report.live_chunks,
        report.tombstones,
        report.tombstone_fraction * 100.0
    );
    println!(
        "Model: {} ({} dims, {})",
        report.model, report.dimension, report.metric
    );
    println!(
        "Generation: {}, last compaction: {}",
        report.generation,
        report
            .last_compaction
            .map_or_else(|| "never".to_string(), |t| t.to_rfc3339())
    );
    for (path, status) in &report.paths {
        println!(
            "  {:<8} {:>5}  {}",
            status.state.to_string(),
            status.chunks,
            path.display()
        );
        if let Some(err) = &status.last_error {
            println!("           error: {}", err);
        }
    }
}

/// Compact the graph now, regardless of the tombstone threshold.
pub async fn run_compact(args: &GlobalArgs) -> Result<()> {
    let settings = prepare(args, &[])?;
    let engine = SyncEngine::open_without_scan(settings)
        .await
        .context("Failed to open sync engine")?;
    let report = engine.compact().await.context("Compaction failed")?;
    engine
        .shutdown()
        .await
        .context("Failed to shut down sync engine")?;

    println!(
        "Compacted: reclaimed {} nodes, {} live (generation {})",
        report.reclaimed, report.live, report.generation
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_condense_collapses_whitespace() {
        assert_eq!(condense("  alpha\n\n beta\tgamma ", 100), "alpha beta gamma");
    }

    #[test]
    fn test_condense_truncates_on_char_boundary() {
        let out = condense("héllo wörld", 4);
        assert_eq!(out, "héll...");
    }

    #[test]
    fn test_absolute_keeps_absolute_paths() {
        let dir = TempDir::new().unwrap();
        assert_eq!(absolute(dir.path()).unwrap(), dir.path());

        let rel = absolute(Path::new("notes")).unwrap();
        assert!(rel.is_absolute());
        assert!(rel.ends_with("notes"));
    }

    #[test]
    fn test_snippet_reads_chunk_span() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "alpha beta gamma").unwrap();

        let hit = SearchHit {
            path: path.clone(),
            offset: 0,
            score: 1.0,
            node_id: 0,
            start: 6,
            end: 10,
        };
        assert_eq!(snippet(&hit), Some("beta".to_string()));

        let stale = SearchHit { end: 400, ..hit };
        assert_eq!(snippet(&stale), None);
    }

    #[test]
    fn test_load_settings_applies_overrides() {
        let dir = TempDir::new().unwrap();
        let args = GlobalArgs {
            config: None,
            db_path: Some(dir.path().join("db").to_string_lossy().into_owned()),
            log_level: Some("debug".to_string()),
        };
        let watch = vec![dir.path().to_string_lossy().into_owned()];
        let settings = load_settings(&args, &watch).unwrap();

        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.expanded_db_path(), dir.path().join("db"));
        assert_eq!(settings.expanded_watch_folders(), vec![dir.path().to_path_buf()]);
    }
}
