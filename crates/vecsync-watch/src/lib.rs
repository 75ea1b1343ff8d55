//! Filesystem event source for the vecsync engine.
//!
//! Watches folders recursively, debounces raw notifications and forwards
//! [`FileEvent`](vecsync_types::FileEvent)s for supported files into a
//! bounded channel.

pub mod error;
pub mod translate;
pub mod watcher;

pub use error::WatchError;
pub use translate::{translate, ExtensionFilter};
pub use watcher::{FolderWatcher, WatcherConfig};
