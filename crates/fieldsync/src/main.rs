//! `fieldsync` - CLI for the offline-first sync coordinator
//!
//! This binary drives a [`SyncCoordinator`] against the configured HTTP
//! backend: inspect state, read and write records, flush the queue, or stay
//! in the foreground syncing whenever connectivity returns.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use fieldsync::cli::{CacheCommand, Cli, Command, ConfigCommand, RunCommand};
use fieldsync::{
    init_logging, Config, ConnectivityMonitor, FlushOutcome, FlushReport, HttpGateway, LocalCache,
    ProbeMonitor, RemoteGateway, Storage, SyncCoordinator,
};

/// Everything a command needs, wired from configuration.
struct App {
    config: Config,
    storage: Arc<Storage>,
    monitor: Arc<ProbeMonitor>,
    coordinator: Arc<SyncCoordinator>,
}

impl App {
    fn open(config: Config) -> anyhow::Result<Self> {
        let db_path = config.database_path();
        let storage = Arc::new(
            Storage::open(&db_path)
                .with_context(|| format!("opening database at {}", db_path.display()))?,
        );
        let monitor = Arc::new(ProbeMonitor::from_config(&config.connectivity));
        let gateway = HttpGateway::from_config(&config.remote).context("building HTTP gateway")?;
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&storage),
            Arc::clone(&monitor) as Arc<dyn ConnectivityMonitor>,
            Arc::new(gateway) as Arc<dyn RemoteGateway>,
        ));
        Ok(Self {
            config,
            storage,
            monitor,
            coordinator,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    // Execute the command
    match cli.command {
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
        command => {
            let app = App::open(config)?;
            match command {
                Command::Status(cmd) => handle_status(&app, cmd.json).await,
                Command::Sync(cmd) => handle_sync(&app, cmd.json).await,
                Command::Queue(cmd) => handle_queue(&app, cmd.json),
                Command::Load(cmd) => {
                    match app.coordinator.load(&cmd.path).await {
                        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                        None => anyhow::bail!("no record at {}", cmd.path),
                    }
                    Ok(())
                }
                Command::Save(cmd) => {
                    app.coordinator.save(&cmd.path, cmd.data).await;
                    let pending = app.coordinator.pending_operations_count();
                    if app.coordinator.is_online() && pending == 0 {
                        println!("Saved {}", cmd.path);
                    } else {
                        println!("Saved {} locally ({pending} pending)", cmd.path);
                    }
                    Ok(())
                }
                Command::Upload(cmd) => {
                    let url = app
                        .coordinator
                        .upload_binary_offline(&cmd.remote_path, cmd.file)
                        .await;
                    println!("{url}");
                    Ok(())
                }
                Command::Run(cmd) => handle_run(&app, &cmd).await,
                Command::Cache(CacheCommand::Clear) => {
                    let removed = app.coordinator.clear_cache();
                    println!("Removed {removed} cached record(s).");
                    Ok(())
                }
                Command::Config(_) => Ok(()),
            }
        }
    }
}

async fn handle_status(app: &App, json: bool) -> anyhow::Result<()> {
    app.coordinator.check_connectivity().await;
    let state = app.coordinator.state();
    let stats = app.storage.stats()?;
    let cached = LocalCache::new(Arc::clone(&app.storage)).len();

    if json {
        let status = serde_json::json!({
            "state": state,
            "database_path": app.storage.path(),
            "database_size_bytes": stats.db_size_bytes,
            "stored_keys": stats.total_keys,
            "cached_records": cached,
            "remote": app.config.remote.base_url,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("fieldsync status");
        println!("----------------");
        println!(
            "Connectivity:  {}",
            if state.is_online { "online" } else { "offline" }
        );
        println!("Sync status:   {}", state.status);
        println!("Pending:       {}", state.pending_count);
        println!(
            "Last sync:     {}",
            state
                .last_sync_time
                .map_or_else(|| "never".to_string(), |t| t.to_rfc3339())
        );
        println!("Cached:        {cached}");
        println!("Database:      {}", app.storage.path().display());
        println!("Remote:        {}", app.config.remote.base_url);
    }
    Ok(())
}

async fn handle_sync(app: &App, json: bool) -> anyhow::Result<()> {
    let report = app.coordinator.force_sync().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if report.outcome == FlushOutcome::QueueUnavailable {
        anyhow::bail!("the pending queue could not be read or written");
    }
    Ok(())
}

fn print_report(report: &FlushReport) {
    match report.outcome {
        FlushOutcome::SkippedOffline => println!("Backend unreachable; nothing was sent."),
        FlushOutcome::SkippedInFlight => println!("A sync is already running."),
        FlushOutcome::Completed | FlushOutcome::QueueUnavailable => {
            println!("Applied:   {}", report.applied);
            println!("Retained:  {}", report.retained);
            println!("Dropped:   {}", report.dropped);
            if report.patched > 0 {
                println!("Patched:   {}", report.patched);
            }
        }
    }
}

fn handle_queue(app: &App, json: bool) -> anyhow::Result<()> {
    let ops = app.coordinator.pending_operations()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&ops)?);
        return Ok(());
    }

    if ops.is_empty() {
        println!("No pending operations.");
        return Ok(());
    }
    for op in &ops {
        println!(
            "{}  {:<14} {}",
            op.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
            op.kind.name(),
            op.kind.target()
        );
    }
    println!();
    println!("{} pending operation(s)", ops.len());
    Ok(())
}

async fn handle_run(app: &App, cmd: &RunCommand) -> anyhow::Result<()> {
    let mut sync = app.config.sync.clone();
    if let Some(secs) = cmd.interval {
        sync.auto_sync_interval_secs = secs;
    }

    let polling = app.monitor.start_polling(app.config.poll_interval());
    let auto_sync = Arc::clone(&app.coordinator).spawn_auto_sync(&sync);

    // Drain anything left over from a previous run.
    let report = app.coordinator.force_sync().await;
    if !report.is_skipped() {
        print_report(&report);
    }

    info!("Running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    info!("Shutting down");
    polling.stop();
    auto_sync.join().await;
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                let mut shown = config.clone();
                if shown.remote.auth_token.is_some() {
                    shown.remote.auth_token = Some("<redacted>".to_string());
                }
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Connectivity]");
                println!(
                    "  Probe:              {}:{}",
                    config.connectivity.probe_host, config.connectivity.probe_port
                );
                println!(
                    "  Probe timeout (ms): {}",
                    config.connectivity.probe_timeout_ms
                );
                println!(
                    "  Poll interval (ms): {}",
                    config.connectivity.poll_interval_ms
                );
                println!();
                println!("[Sync]");
                println!(
                    "  On reconnect:       {}",
                    config.sync.auto_sync_on_reconnect
                );
                println!(
                    "  Interval (s):       {}",
                    config.sync.auto_sync_interval_secs
                );
                println!();
                println!("[Remote]");
                println!("  Base URL:           {}", config.remote.base_url);
                println!(
                    "  Timeout (s):        {}",
                    config.remote.request_timeout_secs
                );
                println!(
                    "  Auth token:         {}",
                    if config.remote.auth_token.is_some() {
                        "set"
                    } else {
                        "not set"
                    }
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => anyhow::bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
