//! Persisted read cursor.
//!
//! Without a checkpoint every restart rereads the input from byte 0, which is
//! correct (content dedup drops everything already stored) but slow for large
//! inputs. With one, a restart resumes at the last committed offset as long
//! as the input is still the same file and has not shrunk.

use crate::error::{MarkwatchError, Result};
use crate::reader::{FileIdentity, TailCursor};
use markwatch_sinks::{replace_file, TableError};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub input: PathBuf,
    pub file_id: Option<FileIdentity>,
    /// Offset of the first byte not yet turned into stored records.
    pub offset: u64,
}

impl Checkpoint {
    /// `Ok(None)` if no checkpoint has been written yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(checkpoint_error(path, err)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|err| checkpoint_error(path, err))
    }

    /// Replace the checkpoint file atomically. The new content is synced
    /// before the rename, so a crash leaves either the old or the new file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|err| checkpoint_error(path, err))?;
        replace_file(path, |file| {
            file.write_all(&json).map_err(|source| TableError::Io {
                path: path.to_path_buf(),
                source,
            })
        })
        .map_err(|err| checkpoint_error(path, err))
    }

    /// Cursor to resume from, if this checkpoint still describes `input`.
    pub fn resume_cursor(
        &self,
        input: &Path,
        size: u64,
        identity: Option<FileIdentity>,
    ) -> Option<TailCursor> {
        if self.input != input {
            info!(
                checkpoint_input = %self.input.display(),
                input = %input.display(),
                "Checkpoint belongs to another input; starting from the beginning"
            );
            return None;
        }
        if self.file_id != identity {
            info!(input = %input.display(), "Input file changed since checkpoint; starting from the beginning");
            return None;
        }
        if self.offset > size {
            info!(
                input = %input.display(),
                offset = self.offset,
                size,
                "Input shrank since checkpoint; starting from the beginning"
            );
            return None;
        }
        Some(TailCursor::at(self.offset, identity))
    }
}

fn checkpoint_error(path: &Path, err: impl std::fmt::Display) -> MarkwatchError {
    MarkwatchError::Checkpoint {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
