//! Configuration management for fieldsync.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "fieldsync";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "sync.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `FIELDSYNC_`)
/// 2. TOML config file at `~/.config/fieldsync/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Connectivity probing.
    pub connectivity: ConnectivityConfig,
    /// Background synchronization.
    pub sync: SyncConfig,
    /// Remote backend.
    pub remote: RemoteConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/fieldsync/sync.db`
    pub database_path: Option<PathBuf>,
}

/// How reachability of the backend is determined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Host to open a TCP connection to.
    pub probe_host: String,
    /// Port to open a TCP connection to.
    pub probe_port: u16,
    /// Give up on a probe after this many milliseconds.
    pub probe_timeout_ms: u64,
    /// Interval between background probes in milliseconds.
    pub poll_interval_ms: u64,
}

/// Background synchronization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Flush the pending queue as soon as connectivity returns.
    pub auto_sync_on_reconnect: bool,
    /// Periodic flush interval in seconds. 0 disables periodic flushing.
    pub auto_sync_interval_secs: u64,
}

/// Remote backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the JSON backend.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Bearer token sent with every request.
    pub auth_token: Option<String>,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_host: "localhost".to_string(),
            probe_port: 443,
            probe_timeout_ms: 3_000,
            poll_interval_ms: 10_000,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync_on_reconnect: true,
            auto_sync_interval_secs: 300,
        }
    }
}

impl SyncConfig {
    /// Periodic flush interval, `None` when disabled.
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        match self.auto_sync_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost".to_string(),
            request_timeout_secs: 30,
            auth_token: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("FIELDSYNC_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::ConfigValidation { message });

        if self.connectivity.probe_host.trim().is_empty() {
            return invalid("probe_host must not be empty".to_string());
        }
        if self.connectivity.probe_timeout_ms == 0 {
            return invalid("probe_timeout_ms must be greater than 0".to_string());
        }
        if self.connectivity.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be greater than 0".to_string());
        }
        if self.remote.request_timeout_secs == 0 {
            return invalid("request_timeout_secs must be greater than 0".to_string());
        }
        if !(self.remote.base_url.starts_with("http://")
            || self.remote.base_url.starts_with("https://"))
        {
            return invalid(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.remote.base_url
            ));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the background probe interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.connectivity.poll_interval_ms)
    }
}
