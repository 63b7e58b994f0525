//! Configuration for the sync engine.
//!
//! Configuration can be loaded from a TOML file; every key is optional and
//! falls back to the engine's fixed defaults.

use feedsync_core::{PEER_FRESHNESS_WINDOW, RETRY_BACKOFF, SETTLE_DELAY, SYNC_INTERVAL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timing configuration for [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay before reopening a failed self endpoint (default: 5000).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Periodic sync interval in seconds (default: 30).
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Grace period before reporting `synced` (default: 1000).
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// How long a peer stays eligible for reconnection (default: 1 hour).
    #[serde(default = "default_peer_freshness_ms")]
    pub peer_freshness_ms: u64,
}

// Default value functions
fn default_retry_backoff_ms() -> u64 {
    RETRY_BACKOFF.as_millis() as u64
}

fn default_sync_interval_secs() -> u64 {
    SYNC_INTERVAL.as_secs()
}

fn default_settle_delay_ms() -> u64 {
    SETTLE_DELAY.as_millis() as u64
}

fn default_peer_freshness_ms() -> u64 {
    PEER_FRESHNESS_WINDOW.as_millis() as u64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: default_retry_backoff_ms(),
            sync_interval_secs: default_sync_interval_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            peer_freshness_ms: default_peer_freshness_ms(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "sync_interval_secs",
                reason: "must be at least 1",
            });
        }
        if self.peer_freshness_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "peer_freshness_ms",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    /// Set the endpoint retry backoff.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Set the periodic sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval_secs = interval.as_secs();
        self
    }

    /// Set the settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the peer freshness window.
    pub fn with_peer_freshness(mut self, window: Duration) -> Self {
        self.peer_freshness_ms = window.as_millis() as u64;
        self
    }

    /// Endpoint retry backoff.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Periodic sync interval.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Settle delay.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Peer freshness window.
    pub fn peer_freshness(&self) -> Duration {
        Duration::from_millis(self.peer_freshness_ms)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid {key}: {reason}")]
    Invalid {
        /// Offending key.
        key: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}
