//! Error types for Markwatch

use markwatch_sinks::TableError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Markwatch error type
#[derive(Error, Debug)]
pub enum MarkwatchError {
    #[error("Input unavailable: {path}: {source}")]
    InputUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Seek to offset {offset} failed in {path}: {source}")]
    Seek {
        path: PathBuf,
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("Read at offset {offset} failed in {path}: {source}")]
    Read {
        path: PathBuf,
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("Cannot open output store: {0}")]
    OutputOpen(#[source] TableError),

    #[error("Cannot write output store: {0}")]
    OutputWrite(#[source] TableError),

    #[error("Checkpoint error on {path}: {message}")]
    Checkpoint { path: PathBuf, message: String },

    #[error("Config error: {0}")]
    Config(String),
}

impl MarkwatchError {
    /// Input-side failures the poll loop retries after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MarkwatchError::InputUnavailable { .. }
                | MarkwatchError::Seek { .. }
                | MarkwatchError::Read { .. }
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, MarkwatchError>;
