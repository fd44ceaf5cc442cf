//! TOML-based configuration for archisync.
//!
//! Every section and field is optional; an empty file (or no file at all)
//! yields the stock worker pool and timing settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Worker pool and polling settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Log level and optional log file.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Default document locations for the CLI.
    #[serde(default)]
    pub paths: PathsConfig,
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Worker pool sizing and the intervals of its polling loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Number of diff workers (default 3).
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Worker sleep when the import queue is empty, in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Interval at which a sync pass checks whether diffing has finished.
    #[serde(default = "default_drain_poll_ms")]
    pub drain_poll_ms: u64,

    /// How many times shutdown polls for the workers to stop.
    #[serde(default = "default_shutdown_retries")]
    pub shutdown_retries: u32,

    #[serde(default = "default_shutdown_poll_ms")]
    pub shutdown_poll_ms: u64,
}

fn default_worker_count() -> usize {
    3
}
fn default_backoff_ms() -> u64 {
    125
}
fn default_drain_poll_ms() -> u64 {
    1000
}
fn default_shutdown_retries() -> u32 {
    25
}
fn default_shutdown_poll_ms() -> u64 {
    75
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            backoff_ms: default_backoff_ms(),
            drain_poll_ms: default_drain_poll_ms(),
            shutdown_retries: default_shutdown_retries(),
            shutdown_poll_ms: default_shutdown_poll_ms(),
        }
    }
}

/// Runtime form of [`SyncConfig`] handed to the sync controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub worker_count: usize,
    pub backoff: Duration,
    pub drain_poll: Duration,
    pub shutdown_retries: u32,
    pub shutdown_poll: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncConfig::default().settings()
    }
}

impl SyncConfig {
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            worker_count: self.worker_count,
            backoff: Duration::from_millis(self.backoff_ms),
            drain_poll: Duration::from_millis(self.drain_poll_ms),
            shutdown_retries: self.shutdown_retries,
            shutdown_poll: Duration::from_millis(self.shutdown_poll_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write logs to this file when set.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Document locations used when the command line does not name them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    pub target: Option<PathBuf>,
    pub import: Option<PathBuf>,
    /// Where the reconciled target is written (defaults to `target`).
    pub output: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that every interval and count is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sync = &self.sync;
        if sync.worker_count == 0 {
            return Err(invalid("sync.worker_count", "at least one worker is required"));
        }
        if sync.backoff_ms == 0 {
            return Err(invalid("sync.backoff_ms", "backoff must be > 0"));
        }
        if sync.drain_poll_ms == 0 {
            return Err(invalid("sync.drain_poll_ms", "drain poll interval must be > 0"));
        }
        if sync.shutdown_retries == 0 {
            return Err(invalid("sync.shutdown_retries", "shutdown retries must be > 0"));
        }
        if sync.shutdown_poll_ms == 0 {
            return Err(invalid("sync.shutdown_poll_ms", "shutdown poll interval must be > 0"));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(invalid(
                "logging.level",
                &format!("unknown level '{}'", self.logging.level),
            ));
        }
        Ok(())
    }

    /// Load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}
