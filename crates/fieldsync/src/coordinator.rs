//! Offline-first synchronization coordinator.
//!
//! [`SyncCoordinator`] is the only component the application talks to.
//! Reads prefer the remote store when it is reachable and fall back to the
//! local cache. Writes always land in the cache first and are queued whenever
//! the remote store cannot take them. Queued operations are replayed in order
//! by [`SyncCoordinator::process_pending_operations`], either on demand or
//! from the background task started with [`SyncCoordinator::spawn_auto_sync`].

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::LocalCache;
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::Result;
use crate::gateway::{GatewayError, RemoteGateway};
use crate::operation::{OperationKind, PendingOperation};
use crate::path::RecordPath;
use crate::placeholder::{replace_placeholder, ResolvedPlaceholders};
use crate::queue::PendingQueue;
use crate::storage::Storage;

/// Storage key holding the time of the last completed flush.
pub const LAST_SYNC_TIME_KEY: &str = "sync:last_sync_time";

/// Whether the coordinator is currently replaying the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// No flush is running.
    #[default]
    Idle,
    /// A flush is running.
    Syncing,
    /// The last flush could not read or write the pending queue.
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Observable coordinator state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SyncState {
    /// Result of the most recent reachability check.
    pub is_online: bool,
    /// Flush status.
    pub status: SyncStatus,
    /// When the last flush completed.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Number of operations waiting in the queue.
    pub pending_count: usize,
}

/// How a flush ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushOutcome {
    /// Every queued operation was attempted.
    Completed,
    /// The remote store was unreachable; the queue was not touched.
    SkippedOffline,
    /// Another flush was already running; the queue was not touched.
    SkippedInFlight,
    /// The pending queue could not be read or written back.
    QueueUnavailable,
}

/// Summary of one flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// How the flush ended.
    pub outcome: FlushOutcome,
    /// Operations the remote store accepted.
    pub applied: usize,
    /// Operations that failed and went back to the queue.
    pub retained: usize,
    /// Operations discarded because they can never succeed.
    pub dropped: usize,
    /// Cached records rewritten after an upload placeholder resolved.
    pub patched: usize,
}

impl FlushReport {
    fn new(outcome: FlushOutcome) -> Self {
        Self {
            outcome,
            applied: 0,
            retained: 0,
            dropped: 0,
            patched: 0,
        }
    }

    /// Report for a flush that found the remote store unreachable.
    #[must_use]
    pub fn skipped_offline() -> Self {
        Self::new(FlushOutcome::SkippedOffline)
    }

    /// Report for a flush that found another flush running.
    #[must_use]
    pub fn skipped_in_flight() -> Self {
        Self::new(FlushOutcome::SkippedInFlight)
    }

    /// Check if the flush did not run at all.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(
            self.outcome,
            FlushOutcome::SkippedOffline | FlushOutcome::SkippedInFlight
        )
    }
}

/// Why a queued operation could not be applied.
#[derive(Debug, Error)]
enum ApplyError {
    /// Worth retrying on the next flush.
    #[error("{0}")]
    Transient(String),
    /// Will never succeed; the operation is discarded.
    #[error("{0}")]
    Permanent(String),
}

impl From<GatewayError> for ApplyError {
    fn from(e: GatewayError) -> Self {
        Self::Transient(e.to_string())
    }
}

/// Coordinates the local cache, the pending queue and the remote store.
///
/// Construct one per application and share it behind an `Arc`.
pub struct SyncCoordinator {
    storage: Arc<Storage>,
    cache: LocalCache,
    queue: PendingQueue,
    monitor: Arc<dyn ConnectivityMonitor>,
    gateway: Arc<dyn RemoteGateway>,
    state: watch::Sender<SyncState>,
    /// Held for the duration of a flush.
    flushing: AsyncMutex<()>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("storage", &self.storage.path())
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    /// Create a coordinator over `storage`.
    ///
    /// The pending count and last sync time are restored from storage. The
    /// online flag starts `false` and is refreshed by the first operation
    /// that checks connectivity.
    #[must_use]
    pub fn new(
        storage: Arc<Storage>,
        monitor: Arc<dyn ConnectivityMonitor>,
        gateway: Arc<dyn RemoteGateway>,
    ) -> Self {
        let cache = LocalCache::new(Arc::clone(&storage));
        let queue = PendingQueue::new(Arc::clone(&storage));

        let pending_count = queue.len().unwrap_or_else(|e| {
            warn!(error = %e, "cannot read pending queue at startup");
            0
        });
        let last_sync_time = read_last_sync_time(&storage);
        let (state, _) = watch::channel(SyncState {
            is_online: false,
            status: SyncStatus::Idle,
            last_sync_time,
            pending_count,
        });

        info!(pending = pending_count, "Sync coordinator ready");
        Self {
            storage,
            cache,
            queue,
            monitor,
            gateway,
            state,
            flushing: AsyncMutex::new(()),
        }
    }

    // === Reads ===

    /// Load the record at `path`.
    ///
    /// When the remote store is reachable its answer wins and refreshes the
    /// cache; a record the remote store reports absent is evicted. Otherwise,
    /// or if the remote read fails, the cached value is returned.
    pub async fn load(&self, path: &RecordPath) -> Option<Value> {
        if !self.check_connectivity().await {
            debug!(path = %path, "offline, reading from cache");
            return self.cache.get(path);
        }

        match self.gateway.get(path).await {
            Ok(Some(value)) => {
                self.cache.set(path, &value);
                Some(value)
            }
            Ok(None) => {
                debug!(path = %path, "record absent remotely, evicting cache entry");
                self.cache.delete(path);
                None
            }
            Err(e) => {
                warn!(path = %path, error = %e, "remote read failed, falling back to cache");
                self.cache.get(path)
            }
        }
    }

    /// Load the record at `path` and deserialize it.
    ///
    /// A value that does not deserialize into `T` is treated as absent.
    pub async fn load_as<T: DeserializeOwned>(&self, path: &RecordPath) -> Option<T> {
        let value = self.load(path).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!(path = %path, error = %e, "record does not match the requested type");
                None
            }
        }
    }

    /// Load the static list `list_id`.
    ///
    /// Lists are cached whole at `static-lists/{list_id}`. Offline, or when
    /// the remote listing fails, the cached list is returned; with nothing
    /// cached the list is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if `list_id` is not a valid path segment.
    pub async fn load_static_list(&self, list_id: &str) -> Result<Vec<Value>> {
        let path = RecordPath::static_list(list_id)?;

        if self.check_connectivity().await {
            match self.gateway.list(&path).await {
                Ok(items) => {
                    self.cache.set(&path, &Value::Array(items.clone()));
                    return Ok(items);
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "remote list failed, falling back to cache");
                }
            }
        }

        Ok(match self.cache.get(&path) {
            Some(Value::Array(items)) => items,
            Some(_) => {
                warn!(path = %path, "cached static list is not an array, ignoring it");
                Vec::new()
            }
            None => Vec::new(),
        })
    }

    // === Writes ===

    /// Save `data` at `path`.
    ///
    /// The cache is written first, so a following [`load`](Self::load) sees
    /// the value even offline. The write then goes to the remote store if it
    /// is reachable and is queued otherwise, or if the remote write fails.
    pub async fn save(&self, path: &RecordPath, data: Value) {
        self.cache.set(path, &data);

        if self.check_connectivity().await {
            match self.gateway.set(path, &data).await {
                Ok(()) => {
                    debug!(path = %path, "saved remotely");
                    return;
                }
                Err(e) => warn!(path = %path, error = %e, "remote write failed, queueing"),
            }
        } else {
            debug!(path = %path, "offline, queueing write");
        }

        self.enqueue(PendingOperation::write(path.clone(), data));
    }

    /// Serialize `value` and [`save`](Self::save) it at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be represented as JSON.
    pub async fn save_as<T>(&self, path: &RecordPath, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let data = serde_json::to_value(value)?;
        self.save(path, data).await;
        Ok(())
    }

    /// Upload a local file to `remote_path`.
    ///
    /// Online, the file is uploaded right away and its URL is returned.
    /// Offline, or if that upload fails, the upload is queued and a
    /// placeholder is returned instead. Records may store the placeholder;
    /// it is replaced with the real URL once the queued upload succeeds.
    pub async fn upload_binary_offline(
        &self,
        remote_path: &str,
        local_resource: impl Into<PathBuf>,
    ) -> String {
        let local_resource = local_resource.into();

        if self.check_connectivity().await {
            match self.upload_file(remote_path, &local_resource).await {
                Ok(url) => {
                    info!(remote_path, "File uploaded");
                    return url;
                }
                Err(e) => warn!(remote_path, error = %e, "upload failed, queueing"),
            }
        }

        let op = PendingOperation::upload_binary(remote_path, local_resource);
        let placeholder = op.placeholder().unwrap_or_default().to_string();
        self.enqueue(op);
        placeholder
    }

    // === Flushing ===

    /// Replay the pending queue against the remote store.
    ///
    /// Operations are applied one at a time in the order they were queued.
    /// Failed operations go back to the front of the queue; operations queued
    /// while the flush runs are kept behind them.
    pub async fn process_pending_operations(&self) -> FlushReport {
        if !self.check_connectivity().await {
            debug!("offline, flush skipped");
            return FlushReport::skipped_offline();
        }
        let Ok(_flushing) = self.flushing.try_lock() else {
            debug!("flush already running, skipped");
            return FlushReport::skipped_in_flight();
        };

        self.set_status(SyncStatus::Syncing);
        let ops = match self.queue.snapshot_and_clear() {
            Ok(ops) => ops,
            Err(e) => {
                error!(error = %e, "cannot read pending queue");
                self.set_status(SyncStatus::Error);
                return FlushReport::new(FlushOutcome::QueueUnavailable);
            }
        };
        info!("Flushing {} pending operation(s)", ops.len());

        let mut report = FlushReport::new(FlushOutcome::Completed);
        let mut resolved = ResolvedPlaceholders::load(Arc::clone(&self.storage));
        let mut work: VecDeque<PendingOperation> = ops.into();
        let mut retained = Vec::new();

        while let Some(op) = work.pop_front() {
            match self.apply(&op, &resolved).await {
                Ok(None) => report.applied += 1,
                Ok(Some((placeholder, url))) => {
                    report.applied += 1;
                    resolved.resolve(&placeholder, &url);
                    let patched = self.patch_cached_records(&placeholder, &url);
                    report.patched += patched.len();
                    work.extend(patched);
                }
                Err(ApplyError::Transient(reason)) => {
                    warn!(op_id = %op.id, op = %op.kind, %reason, "operation failed, kept queued");
                    retained.push(op);
                }
                Err(ApplyError::Permanent(reason)) => {
                    error!(op_id = %op.id, op = %op.kind, %reason, "dropping operation");
                    report.dropped += 1;
                }
            }
        }

        report.retained = retained.len();
        if let Err(e) = self.queue.persist(retained) {
            error!(error = %e, lost = report.retained, "cannot write failed operations back");
            report.outcome = FlushOutcome::QueueUnavailable;
            self.set_status(SyncStatus::Error);
            return report;
        }

        let pending = self.queue.len().unwrap_or(report.retained);
        if pending == 0 {
            resolved.prune();
        }

        let now = Utc::now();
        if let Err(e) = self.storage.put(LAST_SYNC_TIME_KEY, &now.to_rfc3339()) {
            warn!(error = %e, "cannot persist last sync time");
        }
        self.state.send_modify(|state| {
            state.status = SyncStatus::Idle;
            state.last_sync_time = Some(now);
            state.pending_count = pending;
        });

        info!(
            applied = report.applied,
            retained = report.retained,
            dropped = report.dropped,
            "Flush complete"
        );
        report
    }

    /// Flush the queue now.
    pub async fn force_sync(&self) -> FlushReport {
        info!("Sync requested");
        self.process_pending_operations().await
    }

    async fn apply(
        &self,
        op: &PendingOperation,
        resolved: &ResolvedPlaceholders,
    ) -> std::result::Result<Option<(String, String)>, ApplyError> {
        match &op.kind {
            OperationKind::Write { path, payload } => {
                let mut payload = payload.clone();
                resolved.substitute(&mut payload);
                self.gateway.set(path, &payload).await?;
                debug!(op_id = %op.id, path = %path, "write applied");
                Ok(None)
            }
            OperationKind::UploadBinary {
                remote_path,
                local_resource,
                placeholder,
            } => {
                let url = self.upload_file(remote_path, local_resource).await?;
                debug!(op_id = %op.id, remote_path, "upload applied");
                Ok(Some((placeholder.clone(), url)))
            }
        }
    }

    async fn upload_file(
        &self,
        remote_path: &str,
        local_resource: &Path,
    ) -> std::result::Result<String, ApplyError> {
        let bytes = tokio::fs::read(local_resource).await.map_err(|e| {
            let reason = format!("cannot read {}: {e}", local_resource.display());
            if e.kind() == std::io::ErrorKind::NotFound {
                ApplyError::Permanent(reason)
            } else {
                ApplyError::Transient(reason)
            }
        })?;
        self.gateway
            .upload(remote_path, bytes)
            .await
            .map_err(ApplyError::from)
    }

    /// Swap `placeholder` for `url` in every cached record.
    ///
    /// Patched records are written back to the cache and returned as write
    /// operations so they reach the remote store too.
    fn patch_cached_records(&self, placeholder: &str, url: &str) -> Vec<PendingOperation> {
        self.cache
            .entries()
            .into_iter()
            .filter_map(|(path, mut value)| {
                if !replace_placeholder(&mut value, placeholder, url) {
                    return None;
                }
                debug!(path = %path, placeholder, "cached record patched");
                self.cache.set(&path, &value);
                Some(PendingOperation::write(path, value))
            })
            .collect()
    }

    // === Maintenance ===

    /// Drop every cached record. Queued operations are kept.
    ///
    /// Returns the number of removed entries.
    pub fn clear_cache(&self) -> usize {
        let removed = self.cache.delete_all_with_prefix("");
        info!(removed, "Cache cleared");
        removed
    }

    /// Queued operations, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn pending_operations(&self) -> Result<Vec<PendingOperation>> {
        self.queue.list()
    }

    // === State ===

    /// Result of the most recent reachability check.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state.borrow().is_online
    }

    /// Current flush status.
    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        self.state.borrow().status
    }

    /// Number of queued operations.
    #[must_use]
    pub fn pending_operations_count(&self) -> usize {
        self.state.borrow().pending_count
    }

    /// When the last flush completed.
    #[must_use]
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.state.borrow().last_sync_time
    }

    /// Snapshot of the whole state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Check reachability now and update [`is_online`](Self::is_online).
    pub async fn check_connectivity(&self) -> bool {
        let reachable = self.monitor.is_reachable_now().await;
        self.set_online(reachable);
        reachable
    }

    fn set_online(&self, online: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.is_online != online;
            state.is_online = online;
            changed
        });
    }

    fn set_status(&self, status: SyncStatus) {
        self.state.send_if_modified(|state| {
            let changed = state.status != status;
            state.status = status;
            changed
        });
    }

    fn enqueue(&self, op: PendingOperation) {
        let description = op.kind.to_string();
        if let Err(e) = self.queue.enqueue(op) {
            error!(op = %description, error = %e, "cannot queue operation, it exists only locally");
        }
        self.refresh_pending_count();
    }

    fn refresh_pending_count(&self) {
        match self.queue.len() {
            Ok(count) => {
                self.state.send_if_modified(|state| {
                    let changed = state.pending_count != count;
                    state.pending_count = count;
                    changed
                });
            }
            Err(e) => warn!(error = %e, "cannot count pending operations"),
        }
    }

    // === Background ===

    /// Start flushing in the background.
    ///
    /// With `auto_sync_on_reconnect`, the queue is flushed whenever the
    /// monitor reports that connectivity returned. A non-zero
    /// `auto_sync_interval_secs` also flushes on that interval. Either way
    /// nothing happens while the queue is empty.
    #[must_use]
    pub fn spawn_auto_sync(self: Arc<Self>, config: &SyncConfig) -> AutoSyncHandle {
        let on_reconnect = config.auto_sync_on_reconnect;
        let mut ticker = config.interval().map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut events = self.monitor.subscribe();
        let (stop, mut stopped) = watch::channel(false);

        debug!(on_reconnect, interval = ?config.interval(), "Starting auto-sync");
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    event = events.recv() => match event {
                        Ok(state) => {
                            self.set_online(state.is_online());
                            if on_reconnect && state.is_online() {
                                self.flush_if_pending("connectivity regained").await;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "missed connectivity events");
                            if self.check_connectivity().await && on_reconnect {
                                self.flush_if_pending("connectivity events lagged").await;
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                    () = next_tick(&mut ticker) => self.flush_if_pending("interval").await,
                }
            }
            debug!("Auto-sync stopped");
        });

        AutoSyncHandle {
            stop,
            task: Some(task),
        }
    }

    async fn flush_if_pending(&self, trigger: &str) {
        if matches!(self.queue.is_empty(), Ok(true)) {
            debug!(trigger, "nothing pending");
            return;
        }
        let report = self.process_pending_operations().await;
        debug!(trigger, ?report, "background flush finished");
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn read_last_sync_time(storage: &Storage) -> Option<DateTime<Utc>> {
    let raw = match storage.get(LAST_SYNC_TIME_KEY) {
        Ok(raw) => raw?,
        Err(e) => {
            warn!(error = %e, "cannot read last sync time");
            return None;
        }
    };
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(time) => Some(time.with_timezone(&Utc)),
        Err(e) => {
            warn!(error = %e, "stored last sync time is malformed");
            None
        }
    }
}

/// Handle to the background auto-sync task.
///
/// Dropping the handle stops the task once any flush in progress finishes.
#[derive(Debug)]
pub struct AutoSyncHandle {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl AutoSyncHandle {
    /// Ask the task to stop. A flush in progress is allowed to finish.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Stop the task and wait for it to exit.
    pub async fn join(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "auto-sync task failed");
            }
        }
    }

    /// Check if the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for AutoSyncHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
