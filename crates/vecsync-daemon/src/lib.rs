//! vecsync daemon library exports.
//!
//! This crate provides the CLI binary that runs the sync engine against a set
//! of watched folders.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (start, sync, search, status, compact)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    load_settings, run_compact, run_search, show_status, start_daemon, sync_once, GlobalArgs,
};
