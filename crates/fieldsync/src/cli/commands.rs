//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde_json::Value;

use crate::path::RecordPath;

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Sync command arguments.
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Output the flush report as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Queue command arguments.
#[derive(Debug, Args)]
pub struct QueueCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Load command arguments.
#[derive(Debug, Args)]
pub struct LoadCommand {
    /// Record path, e.g. `checklists/2024/chk-1/loc-3`
    #[arg(value_parser = parse_record_path)]
    pub path: RecordPath,
}

/// Save command arguments.
#[derive(Debug, Args)]
pub struct SaveCommand {
    /// Record path, e.g. `checklists/2024/chk-1/loc-3`
    #[arg(value_parser = parse_record_path)]
    pub path: RecordPath,

    /// JSON document to store
    #[arg(value_parser = parse_json)]
    pub data: Value,
}

/// Upload command arguments.
#[derive(Debug, Args)]
pub struct UploadCommand {
    /// Destination path in the remote file store
    pub remote_path: String,

    /// Local file to upload
    pub file: PathBuf,
}

/// Run command arguments.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Flush every N seconds (overrides `sync.auto_sync_interval_secs`, 0 disables)
    #[arg(short, long, value_name = "SECS")]
    pub interval: Option<u64>,
}

/// Local cache commands.
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Drop every cached record (queued writes are kept)
    Clear,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

fn parse_record_path(raw: &str) -> Result<RecordPath, String> {
    RecordPath::parse(raw).map_err(|e| e.to_string())
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))
}
