//! vecsync daemon
//!
//! Keeps a vector index in sync with a set of folders and answers
//! similarity queries against it.
//!
//! # Usage
//!
//! ```bash
//! vecsync-daemon start [--watch DIR]... [--db-path PATH]
//! vecsync-daemon sync [PATH]...
//! vecsync-daemon search "query text" [-k N] [--prefix DIR] [--json]
//! vecsync-daemon status [--json]
//! vecsync-daemon compact
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (<config dir>/vecsync/config.toml)
//! 3. Environment variables (VECSYNC_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use vecsync_daemon::{
    run_compact, run_search, show_status, start_daemon, sync_once, Cli, Commands, GlobalArgs,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let args = GlobalArgs {
        config: cli.config,
        db_path: cli.db_path,
        log_level: cli.log_level,
    };

    match cli.command {
        Commands::Start { watch } => {
            start_daemon(&args, &watch).await?;
        }
        Commands::Sync { paths, watch } => {
            sync_once(&args, &paths, &watch).await?;
        }
        Commands::Search {
            query,
            k,
            prefix,
            min_score,
            json,
        } => {
            run_search(&args, &query, k, prefix.as_deref(), min_score, json).await?;
        }
        Commands::Status { json } => {
            show_status(&args, json).await?;
        }
        Commands::Compact => {
            run_compact(&args).await?;
        }
    }

    Ok(())
}
