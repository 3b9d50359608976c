//! Configuration structures.
//!
//! # Example
//!
//! ```rust
//! use weft_common::config::WeftConfig;
//!
//! let config = WeftConfig::from_toml_str(
//!     r#"
//!     [scheduler]
//!     txn_timeout_ms = 500
//!
//!     [streamer]
//!     buffer_size = 4
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.streamer.buffer_size, 4);
//! assert_eq!(config.scheduler.max_queue_depth, 0);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::constants::{
    DEFAULT_MAX_QUEUE_DEPTH, DEFAULT_STREAMER_BUFFER, DEFAULT_TXN_TIMEOUT_MS, MAX_STREAMER_BUFFER,
};
use crate::error::ErrorCode;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML could not be parsed.
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be serialized.
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Returns the stable error code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidConfig
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeftConfig {
    /// Transaction scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Streamer settings.
    #[serde(default)]
    pub streamer: StreamerConfig,

    /// Query executor settings.
    #[serde(default)]
    pub query: QueryConfig,
}

impl WeftConfig {
    /// Parses configuration from a TOML string and validates it.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file and validates it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Converts configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Creates a configuration for tests: short timeouts, small buffers.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            scheduler: SchedulerConfig {
                txn_timeout_ms: 5_000,
                ..Default::default()
            },
            streamer: StreamerConfig { buffer_size: 2 },
            query: QueryConfig::default(),
        }
    }

    /// Validates the streamer and query sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.streamer.validate()?;
        self.query.validate()
    }
}

/// Transaction scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long a running transaction may hold its scope before it is
    /// aborted, in milliseconds. Zero disables the limit.
    #[serde(default = "default_txn_timeout_ms")]
    pub txn_timeout_ms: u64,

    /// Maximum number of queued requests. Zero means unbounded.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
}

fn default_txn_timeout_ms() -> u64 {
    DEFAULT_TXN_TIMEOUT_MS
}

fn default_max_queue_depth() -> usize {
    DEFAULT_MAX_QUEUE_DEPTH
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            txn_timeout_ms: default_txn_timeout_ms(),
            max_queue_depth: default_max_queue_depth(),
        }
    }
}

impl SchedulerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transaction timeout. `None` disables it.
    #[must_use]
    pub fn txn_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.txn_timeout_ms = timeout.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Sets the queue depth limit. Zero means unbounded.
    #[must_use]
    pub fn max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Returns the transaction timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.txn_timeout_ms > 0).then(|| Duration::from_millis(self.txn_timeout_ms))
    }
}

/// Streamer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamerConfig {
    /// Look-ahead buffer size in rows. Also caps outstanding backend reads.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_buffer_size() -> usize {
    DEFAULT_STREAMER_BUFFER
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

impl StreamerConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "streamer.buffer_size must be at least 1".to_string(),
            ));
        }
        if self.buffer_size > MAX_STREAMER_BUFFER {
            return Err(ConfigError::Invalid(format!(
                "streamer.buffer_size must be at most {MAX_STREAMER_BUFFER}"
            )));
        }
        Ok(())
    }
}

/// Query executor configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Row limit applied to queries that do not set their own.
    #[serde(default)]
    pub default_limit: Option<usize>,
}

impl QueryConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "query.default_limit must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}
