//! Recursive debounced watcher feeding a bounded channel.

use std::path::PathBuf;
use std::time::Duration;

use notify_debouncer_full::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use vecsync_types::{FileEvent, Settings};

use crate::error::WatchError;
use crate::translate::{translate, ExtensionFilter};

/// What to watch and how long to wait for a burst to settle.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub roots: Vec<PathBuf>,
    pub extensions: Vec<String>,
    pub debounce: Duration,
}

impl WatcherConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            roots: settings.expanded_watch_folders(),
            extensions: settings.supported_extensions(),
            debounce: Duration::from_millis(settings.reconciler.debounce_ms),
        }
    }
}

/// Live watch over a set of folders. Dropping it stops the watch.
pub struct FolderWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    roots: Vec<PathBuf>,
}

impl FolderWatcher {
    /// Start watching. Events are delivered on `tx` from the debouncer's
    /// thread; a full channel blocks that thread, which delays further events
    /// instead of dropping them.
    pub fn start(config: WatcherConfig, tx: mpsc::Sender<FileEvent>) -> Result<Self, WatchError> {
        if let Some(missing) = config.roots.iter().find(|r| !r.is_dir()) {
            return Err(WatchError::MissingRoot(missing.clone()));
        }

        let filter = ExtensionFilter::new(&config.extensions);
        let mut debouncer = new_debouncer(
            config.debounce,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in events {
                        for file_event in translate(&event.event, &filter) {
                            debug!(path = %file_event.path.display(), kind = ?file_event.kind, "File event");
                            if tx.blocking_send(file_event).is_err() {
                                warn!("Event receiver dropped; discarding file event");
                                return;
                            }
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        error!(error = %e, "Watch error");
                    }
                }
            },
        )?;

        for root in &config.roots {
            debouncer.watch(root, RecursiveMode::Recursive)?;
            info!(root = %root.display(), "Watching folder");
        }

        Ok(Self {
            _debouncer: debouncer,
            roots: config.roots,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}
