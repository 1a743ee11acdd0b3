//! Controller configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! workers = 4
//! max_retries = 5
//! resync_interval_secs = 300
//!
//! [rate_limit]
//! base_delay_ms = 5
//! max_delay_secs = 1000
//! qps = 10.0
//! burst = 100
//!
//! [reconnect]
//! initial_delay_ms = 800
//! max_delay_ms = 30000
//! jitter = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::error::{Error, Result};

/// Top-level controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Number of worker tasks pulling from the queue.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Consecutive failed attempts before a key is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Interval between full relists. `0` disables periodic resync.
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    /// Upper bound on the initial sync. `None` waits forever.
    #[serde(default)]
    pub sync_timeout_secs: Option<u64>,

    /// Whether Deleted notifications enqueue their key.
    #[serde(default)]
    pub enqueue_deletes: bool,

    /// Work queue rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Informer reconnect backoff.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: default_max_retries(),
            resync_interval_secs: default_resync_interval(),
            sync_timeout_secs: None,
            enqueue_deletes: false,
            rate_limit: RateLimitConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `TomlParseFailed` for malformed input and `InvalidConfig` when a
    /// value is out of range.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| Error::toml_parse_failed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `FileReadFailed` if the file cannot be read, otherwise the same
    /// errors as [`ControllerConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        Self::from_toml_str(&contents)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers", "must be at least 1"));
        }
        if self.max_retries == 0 {
            return Err(Error::invalid_config("max_retries", "must be at least 1"));
        }
        self.rate_limit.validate()?;
        self.reconnect.validate()
    }

    /// Periodic resync interval, `None` when disabled.
    #[must_use]
    pub const fn resync_interval(&self) -> Option<Duration> {
        match self.resync_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Initial sync timeout, `None` to wait forever.
    #[must_use]
    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout_secs.map(Duration::from_secs)
    }
}

/// Rate limiting applied to requeued keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Per-item backoff for the first failure.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Per-item backoff ceiling.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Overall token bucket refill rate.
    #[serde(default = "default_qps")]
    pub qps: f64,

    /// Overall token bucket size.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            qps: default_qps(),
            burst: default_burst(),
        }
    }
}

impl RateLimitConfig {
    fn validate(&self) -> Result<()> {
        if !(self.qps.is_finite() && self.qps > 0.0) {
            return Err(Error::invalid_config("rate_limit.qps", "must be positive"));
        }
        if self.burst == 0 {
            return Err(Error::invalid_config("rate_limit.burst", "must be at least 1"));
        }
        if self.base_delay() > self.max_delay() {
            return Err(Error::invalid_config(
                "rate_limit.base_delay_ms",
                "must not exceed max_delay_secs",
            ));
        }
        Ok(())
    }

    /// Per-item backoff for the first failure.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Per-item backoff ceiling.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

/// Backoff between informer list/watch attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_initial_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_reconnect_initial_ms(),
            max_delay_ms: default_reconnect_max_ms(),
            jitter: default_jitter(),
        }
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Result<()> {
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(Error::invalid_config(
                "reconnect.initial_delay_ms",
                "must not exceed max_delay_ms",
            ));
        }
        Ok(())
    }

    /// Backoff parameters for reconnect attempts.
    #[must_use]
    pub const fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_jitter(self.jitter)
    }
}

const fn default_workers() -> usize {
    1
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_resync_interval() -> u64 {
    300 // 5 minutes
}

const fn default_base_delay_ms() -> u64 {
    5
}

const fn default_max_delay_secs() -> u64 {
    1000
}

const fn default_qps() -> f64 {
    10.0
}

const fn default_burst() -> u32 {
    100
}

const fn default_reconnect_initial_ms() -> u64 {
    800
}

const fn default_reconnect_max_ms() -> u64 {
    30_000
}

const fn default_jitter() -> bool {
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.workers, 1);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.resync_interval(), Some(Duration::from_secs(300)));
        assert_eq!(config.sync_timeout(), None);
        assert!(!config.enqueue_deletes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ControllerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ControllerConfig::default());
    }

    #[test]
    fn test_zero_resync_disables_resync() {
        let config = ControllerConfig::from_toml_str("resync_interval_secs = 0").unwrap();
        assert_eq!(config.resync_interval(), None);
    }

    #[test]
    fn test_nested_tables_parse() {
        let config = ControllerConfig::from_toml_str(
            r"
            workers = 3
            sync_timeout_secs = 10

            [rate_limit]
            base_delay_ms = 50
            qps = 2.5

            [reconnect]
            jitter = false
            ",
        )
        .unwrap();

        assert_eq!(config.workers, 3);
        assert_eq!(config.sync_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.rate_limit.base_delay(), Duration::from_millis(50));
        assert_eq!(config.rate_limit.max_delay(), Duration::from_secs(1000));
        assert!((config.rate_limit.qps - 2.5).abs() < f64::EPSILON);
        assert!(!config.reconnect.backoff().jitter);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = ControllerConfig::from_toml_str("workers = 0");
        assert!(matches!(result, Err(Error::InvalidConfig { ref field, .. }) if field == "workers"));
    }

    #[test]
    fn test_base_delay_above_max_rejected() {
        let result = ControllerConfig::from_toml_str(
            "[rate_limit]\nbase_delay_ms = 5000\nmax_delay_secs = 1",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_toml_reports_parse_error() {
        let result = ControllerConfig::from_toml_str("workers = [");
        assert!(matches!(result, Err(Error::TomlParseFailed { .. })));
    }
}
