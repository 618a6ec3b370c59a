//! `fieldsync` - Offline-first synchronization for field data
//!
//! This library lets an application read and write domain records
//! (checklists, schedules, photos) while disconnected. Writes land in a
//! durable local cache first and are queued until the authoritative remote
//! store accepts them.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod operation;
pub mod path;
pub mod placeholder;
pub mod queue;
pub mod storage;

pub use cache::LocalCache;
pub use config::Config;
pub use connectivity::{
    Connectivity, ConnectivityMonitor, MonitorHandle, ProbeMonitor, SignalledConnectivity,
};
pub use coordinator::{
    AutoSyncHandle, FlushOutcome, FlushReport, SyncCoordinator, SyncState, SyncStatus,
};
pub use error::{Error, Result};
pub use gateway::{GatewayError, HttpGateway, RemoteGateway};
pub use logging::init_logging;
pub use operation::{OperationKind, PendingOperation};
pub use path::RecordPath;
pub use queue::PendingQueue;
pub use storage::{Storage, StorageStats};
