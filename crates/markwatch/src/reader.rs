//! Cursor-tracking reader for an append-only input file.
//!
//! The file is reopened on every poll and the handle is dropped before the
//! poll returns, so an external writer may replace or truncate it at any
//! time. Each poll stats the open handle, decides where to resume, and reads
//! at most up to the size it saw. Bytes appended after the stat are picked
//! up by the next poll.

use crate::error::{MarkwatchError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, Metadata};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Upper bound on bytes returned by a single poll.
pub const DEFAULT_MAX_READ_BYTES: u64 = 8 * 1024 * 1024;

/// Identity of the file behind a path, used to notice rotation by
/// rename-and-recreate even when the new file is not smaller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    pub dev: u64,
    pub ino: u64,
}

impl FileIdentity {
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Some(Self {
                dev: metadata.dev(),
                ino: metadata.ino(),
            })
        }

        #[cfg(not(unix))]
        {
            let _ = metadata;
            None
        }
    }
}

/// Read position in the input file.
///
/// `offset` counts bytes already read from the file identified by `identity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TailCursor {
    pub offset: u64,
    pub identity: Option<FileIdentity>,
}

impl TailCursor {
    /// Cursor at byte 0 of whatever file is found on the first poll.
    pub fn start() -> Self {
        Self::default()
    }

    pub fn at(offset: u64, identity: Option<FileIdentity>) -> Self {
        Self { offset, identity }
    }
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Newly read bytes; empty when nothing was appended.
    pub bytes: Vec<u8>,
    /// Cursor to use for the next poll.
    pub cursor: TailCursor,
    /// The file shrank or was replaced and reading restarted at byte 0.
    /// Anything carried over from earlier reads belongs to the old content.
    pub rewound: bool,
}

/// Reader bound to one input path.
#[derive(Debug, Clone)]
pub struct TailReader {
    path: PathBuf,
    max_read_bytes: u64,
}

impl TailReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
        }
    }

    pub fn with_max_read_bytes(mut self, max_read_bytes: u64) -> Self {
        self.max_read_bytes = max_read_bytes.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size and identity of the input file.
    pub fn stat(&self) -> Result<(u64, Option<FileIdentity>)> {
        let metadata = std::fs::metadata(&self.path).map_err(|source| {
            MarkwatchError::InputUnavailable {
                path: self.path.clone(),
                source,
            }
        })?;
        Ok((metadata.len(), FileIdentity::from_metadata(&metadata)))
    }

    /// Read whatever was appended since `cursor`.
    ///
    /// On error nothing is consumed: the caller keeps using `cursor`.
    pub fn poll(&self, cursor: &TailCursor) -> Result<ReadOutcome> {
        let unavailable = |source| MarkwatchError::InputUnavailable {
            path: self.path.clone(),
            source,
        };

        let mut file = File::open(&self.path).map_err(unavailable)?;
        let metadata = file.metadata().map_err(unavailable)?;
        let size = metadata.len();
        let identity = FileIdentity::from_metadata(&metadata);

        let mut start = cursor.offset;
        let mut rewound = false;
        let replaced = matches!(
            (cursor.identity, identity),
            (Some(previous), Some(current)) if previous != current
        );
        if replaced {
            warn!(
                path = %self.path.display(),
                previous_offset = cursor.offset,
                current_size = size,
                "Input file replaced; reading new file from the start"
            );
            start = 0;
            rewound = true;
        } else if size < start {
            warn!(
                path = %self.path.display(),
                previous_offset = cursor.offset,
                current_size = size,
                "Input file truncated; reading from the start"
            );
            start = 0;
            rewound = true;
        }

        if size == start {
            return Ok(ReadOutcome {
                bytes: Vec::new(),
                cursor: TailCursor::at(start, identity),
                rewound,
            });
        }

        file.seek(SeekFrom::Start(start))
            .map_err(|source| MarkwatchError::Seek {
                path: self.path.clone(),
                offset: start,
                source,
            })?;

        let want = (size - start).min(self.max_read_bytes);
        let mut bytes = Vec::with_capacity(want as usize);
        file.take(want)
            .read_to_end(&mut bytes)
            .map_err(|source| MarkwatchError::Read {
                path: self.path.clone(),
                offset: start,
                source,
            })?;

        let offset = start + bytes.len() as u64;
        debug!(
            path = %self.path.display(),
            from = start,
            to = offset,
            size,
            "Read appended bytes"
        );
        Ok(ReadOutcome {
            bytes,
            cursor: TailCursor::at(offset, identity),
            rewound,
        })
    }
}
