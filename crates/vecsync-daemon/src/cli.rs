//! CLI argument parsing for the vecsync daemon.
//!
//! Commands:
//! - start: Watch folders and keep the index in sync until signalled
//! - sync: One-shot reconcile of the watch folders (or given paths), then exit
//! - search: Query the index
//! - status: Show per-path and index status
//! - compact: Rebuild the graph without tombstoned nodes

use clap::{Parser, Subcommand};

/// vecsync daemon CLI
#[derive(Parser, Debug)]
#[command(name = "vecsync-daemon")]
#[command(author, version, about = "Keeps a vector index in sync with a set of folders")]
pub struct Cli {
    /// Path to config file (default: <config dir>/vecsync/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Override RocksDB storage path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Watch folders and keep the index in sync
    Start {
        /// Folder to watch (repeatable; replaces configured watch folders)
        #[arg(short, long = "watch")]
        watch: Vec<String>,
    },

    /// Reconcile once and exit
    Sync {
        /// Files or folders to reindex (default: rescan all watch folders)
        paths: Vec<String>,

        /// Folder to scan (repeatable; replaces configured watch folders)
        #[arg(short, long = "watch")]
        watch: Vec<String>,
    },

    /// Search the index
    Search {
        /// Query text
        query: String,

        /// Number of results
        #[arg(short, long)]
        k: Option<usize>,

        /// Only return chunks under this path
        #[arg(short, long)]
        prefix: Option<String>,

        /// Drop hits scoring at or below this
        #[arg(long)]
        min_score: Option<f32>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show index status
    Status {
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rebuild the graph without tombstoned nodes
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_start() {
        let cli = Cli::parse_from(["vecsync-daemon", "start"]);
        match cli.command {
            Commands::Start { watch } => assert!(watch.is_empty()),
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_cli_start_with_watch_folders() {
        let cli = Cli::parse_from(["vecsync-daemon", "start", "-w", "/notes", "--watch", "/docs"]);
        match cli.command {
            Commands::Start { watch } => assert_eq!(watch, vec!["/notes", "/docs"]),
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_cli_with_config_and_db_path() {
        let cli = Cli::parse_from([
            "vecsync-daemon",
            "--config",
            "/path/to/config.toml",
            "status",
            "--db-path",
            "/custom/db",
        ]);
        assert_eq!(cli.config, Some("/path/to/config.toml".to_string()));
        assert_eq!(cli.db_path, Some("/custom/db".to_string()));
        assert!(matches!(cli.command, Commands::Status { json: false }));
    }

    #[test]
    fn test_cli_with_log_level() {
        let cli = Cli::parse_from(["vecsync-daemon", "--log-level", "debug", "compact"]);
        assert_eq!(cli.log_level, Some("debug".to_string()));
        assert!(matches!(cli.command, Commands::Compact));
    }

    #[test]
    fn test_cli_sync_paths() {
        let cli = Cli::parse_from(["vecsync-daemon", "sync", "/notes/a.txt", "/notes/sub"]);
        match cli.command {
            Commands::Sync { paths, watch } => {
                assert_eq!(paths, vec!["/notes/a.txt", "/notes/sub"]);
                assert!(watch.is_empty());
            }
            _ => panic!("Expected Sync command"),
        }
    }

    #[test]
    fn test_cli_search() {
        let cli = Cli::parse_from([
            "vecsync-daemon",
            "search",
            "rust ownership",
            "-k",
            "5",
            "--prefix",
            "/notes",
            "--json",
        ]);
        match cli.command {
            Commands::Search {
                query,
                k,
                prefix,
                min_score,
                json,
            } => {
                assert_eq!(query, "rust ownership");
                assert_eq!(k, Some(5));
                assert_eq!(prefix, Some("/notes".to_string()));
                assert_eq!(min_score, None);
                assert!(json);
            }
            _ => panic!("Expected Search command"),
        }
    }

    #[test]
    fn test_cli_search_requires_query() {
        assert!(Cli::try_parse_from(["vecsync-daemon", "search"]).is_err());
    }
}
