//! Watcher error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchError {
    /// Underlying notification backend failed
    #[error("Notify error: {0}")]
    Notify(#[from] notify_debouncer_full::notify::Error),

    /// A configured watch folder does not exist
    #[error("Watch folder not found: {0}")]
    MissingRoot(PathBuf),
}
