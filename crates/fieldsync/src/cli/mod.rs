//! Command-line interface for fieldsync.
//!
//! This module provides the CLI structure for the `fieldsync` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    CacheCommand, ConfigCommand, LoadCommand, QueueCommand, RunCommand, SaveCommand,
    StatusCommand, SyncCommand, UploadCommand,
};

use crate::logging::Verbosity;

/// fieldsync - Offline-first sync for field data
///
/// Reads and writes records through a local cache and a durable queue of
/// pending writes, replaying them against the backend once it is reachable.
#[derive(Debug, Parser)]
#[command(name = "fieldsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show connectivity, sync status and queue size
    Status(StatusCommand),

    /// Flush pending operations now
    Sync(SyncCommand),

    /// List pending operations
    Queue(QueueCommand),

    /// Load a record (remote when reachable, cache otherwise)
    Load(LoadCommand),

    /// Save a record (queued when the backend is unreachable)
    Save(SaveCommand),

    /// Upload a file, queueing it when the backend is unreachable
    Upload(UploadCommand),

    /// Stay in the foreground and sync whenever connectivity returns
    Run(RunCommand),

    /// Manage the local cache
    #[command(subcommand)]
    Cache(CacheCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.verbose, self.quiet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_name() {
        assert_eq!(Cli::command().get_name(), "fieldsync");
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(parse(&["fieldsync", "status"]).verbosity(), Verbosity::Normal);
        assert_eq!(
            parse(&["fieldsync", "-vv", "status"]).verbosity(),
            Verbosity::Trace
        );
        assert_eq!(
            parse(&["fieldsync", "-v", "-q", "status"]).verbosity(),
            Verbosity::Quiet
        );
    }

    #[test]
    fn test_parse_save() {
        let cli = parse(&["fieldsync", "save", "records/x", r#"{"id":"x"}"#]);
        match cli.command {
            Command::Save(cmd) => {
                assert_eq!(cmd.path.as_str(), "records/x");
                assert_eq!(cmd.data["id"], "x");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_save_rejects_invalid_input() {
        assert!(Cli::try_parse_from(["fieldsync", "save", "a//b", "{}"]).is_err());
        assert!(Cli::try_parse_from(["fieldsync", "save", "records/x", "{oops"]).is_err());
    }

    #[test]
    fn test_parse_load() {
        let cli = parse(&["fieldsync", "load", "checklists/2024/c1/l1"]);
        assert!(matches!(cli.command, Command::Load(_)));
    }

    #[test]
    fn test_parse_upload() {
        let cli = parse(&["fieldsync", "upload", "photos/p.jpg", "/tmp/p.jpg"]);
        match cli.command {
            Command::Upload(cmd) => {
                assert_eq!(cmd.remote_path, "photos/p.jpg");
                assert_eq!(cmd.file, PathBuf::from("/tmp/p.jpg"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_run_interval() {
        let cli = parse(&["fieldsync", "run", "--interval", "30"]);
        assert!(matches!(
            cli.command,
            Command::Run(RunCommand { interval: Some(30) })
        ));
    }

    #[test]
    fn test_parse_cache_clear() {
        let cli = parse(&["fieldsync", "cache", "clear"]);
        assert!(matches!(cli.command, Command::Cache(CacheCommand::Clear)));
    }

    #[test]
    fn test_parse_queue_json() {
        let cli = parse(&["fieldsync", "queue", "--json"]);
        assert!(matches!(cli.command, Command::Queue(QueueCommand { json: true })));
    }

    #[test]
    fn test_parse_with_config() {
        let cli = parse(&["fieldsync", "-c", "/custom/config.toml", "sync"]);
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
        assert!(matches!(cli.command, Command::Sync(_)));
    }

    #[test]
    fn test_parse_config_validate() {
        let cli = parse(&["fieldsync", "config", "validate", "--file", "/tmp/c.toml"]);
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }
}
