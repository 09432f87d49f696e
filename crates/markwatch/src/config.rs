//! Configuration for Markwatch

use crate::error::{MarkwatchError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for Markwatch
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MarkwatchConfig {
    /// Sleep between polls when no new data arrived, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Sleep after a failed poll, in milliseconds
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// Maximum bytes read from the input per poll
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: u64,

    /// Maximum bytes of an unfinished block carried between polls
    #[serde(default = "default_max_pending_bytes")]
    pub max_pending_bytes: usize,

    /// Where to persist the read cursor. Unset: rescan the input on restart.
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,

    /// Directory for the rotated log file. Unset: log to stderr only.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_error_backoff_ms() -> u64 {
    1000
}

fn default_max_read_bytes() -> u64 {
    crate::reader::DEFAULT_MAX_READ_BYTES
}

fn default_max_pending_bytes() -> usize {
    1024 * 1024
}

impl Default for MarkwatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            max_read_bytes: default_max_read_bytes(),
            max_pending_bytes: default_max_pending_bytes(),
            checkpoint_path: None,
            log_dir: None,
        }
    }
}

impl MarkwatchConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MarkwatchError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: MarkwatchConfig = toml::from_str(&content)
            .map_err(|e| MarkwatchError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(MarkwatchError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_read_bytes == 0 {
            return Err(MarkwatchError::Config(
                "max_read_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}
