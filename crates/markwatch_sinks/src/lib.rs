//! Tabular output stores.
//!
//! A store is a single sheet: a header row followed by data rows. Callers
//! interact with it through [`TableStore`] only:
//! - create with a header (done by each backend's `open_or_create`)
//! - append rows in memory
//! - read the rows that exist
//! - persist the whole document to its path
//!
//! Persisting always rewrites the full document through a staged temp file
//! that is renamed over the target, so readers never observe a half-written
//! table.
//!
//! [`OutputTable`] picks the backend from the file extension: `.xlsx`
//! workbooks, or `.csv`/`.tsv`/`.tab` delimited text.

use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

mod delimited;
mod xlsx;

pub use delimited::DelimitedTable;
pub use xlsx::{XlsxTable, NEW_SHEET_NAME};

/// Errors returned by table stores.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to read workbook {path}: {source}")]
    XlsxRead {
        path: PathBuf,
        #[source]
        source: calamine::XlsxError,
    },

    #[error("Failed to write workbook {path}: {source}")]
    XlsxWrite {
        path: PathBuf,
        #[source]
        source: rust_xlsxwriter::XlsxError,
    },

    #[error("Unsupported workbook {path}: {reason}")]
    UnsupportedWorkbook { path: PathBuf, reason: String },

    #[error("Unsupported table format for {path} (expected .xlsx, .csv, .tsv or .tab)")]
    UnsupportedFormat { path: PathBuf },

    #[error("Header mismatch in {path}: expected {expected:?}, found {found:?}")]
    HeaderMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },
}

pub type TableResult<T> = std::result::Result<T, TableError>;

/// On-disk layout of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Xlsx,
    Csv,
    Tsv,
}

impl TableFormat {
    /// Pick the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> TableResult<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("xlsx") => Ok(TableFormat::Xlsx),
            Some("csv") => Ok(TableFormat::Csv),
            Some("tsv") | Some("tab") => Ok(TableFormat::Tsv),
            _ => Err(TableError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Field delimiter, for delimited text formats only.
    pub fn delimiter(self) -> Option<u8> {
        match self {
            TableFormat::Xlsx => None,
            TableFormat::Csv => Some(b','),
            TableFormat::Tsv => Some(b'\t'),
        }
    }
}

/// The header row a table is expected to start with.
#[derive(Debug, Clone, Copy)]
pub struct HeaderSpec<'a> {
    /// Written to new tables.
    pub columns: &'a [&'a str],
    /// Earlier headers still accepted on existing tables. A table opened
    /// with one of them keeps it.
    pub aliases: &'a [&'a [&'a str]],
}

impl<'a> HeaderSpec<'a> {
    pub fn new(columns: &'a [&'a str]) -> Self {
        Self {
            columns,
            aliases: &[],
        }
    }

    pub fn with_aliases(self, aliases: &'a [&'a [&'a str]]) -> Self {
        Self { aliases, ..self }
    }

    pub(crate) fn to_row(self) -> Vec<String> {
        self.columns.iter().map(|cell| cell.to_string()).collect()
    }

    pub(crate) fn accepts(self, found: &[String]) -> bool {
        std::iter::once(self.columns)
            .chain(self.aliases.iter().copied())
            .any(|expected| found.iter().map(String::as_str).eq(expected.iter().copied()))
    }

    pub(crate) fn check(self, path: &Path, found: Vec<String>) -> TableResult<Vec<String>> {
        if self.accepts(&found) {
            Ok(found)
        } else {
            Err(TableError::HeaderMismatch {
                path: path.to_path_buf(),
                expected: self.to_row(),
                found,
            })
        }
    }
}

/// Minimal contract the mark sink needs from a tabular document.
pub trait TableStore {
    /// Data rows in file order, header excluded.
    fn rows(&self) -> &[Vec<String>];

    /// Append a data row in memory. Returns its 1-based sheet row index
    /// (the header is row 1, so the first data row is 2).
    fn append_row(&mut self, row: Vec<String>) -> usize;

    /// Rows appended since the last successful [`TableStore::persist`].
    fn unpersisted_rows(&self) -> usize;

    /// Write the entire document to its path.
    ///
    /// On error the in-memory rows are kept and still count as unpersisted.
    fn persist(&mut self) -> TableResult<()>;
}

/// Table backend chosen by file extension.
#[derive(Debug)]
pub enum OutputTable {
    Xlsx(XlsxTable),
    Delimited(DelimitedTable),
}

impl OutputTable {
    pub fn open_or_create(path: impl AsRef<Path>, header: HeaderSpec<'_>) -> TableResult<Self> {
        let path = path.as_ref();
        match TableFormat::from_path(path)? {
            TableFormat::Xlsx => XlsxTable::open_with(path, header).map(OutputTable::Xlsx),
            TableFormat::Csv | TableFormat::Tsv => {
                DelimitedTable::open_with(path, header).map(OutputTable::Delimited)
            }
        }
    }

    pub fn format(&self) -> TableFormat {
        match self {
            OutputTable::Xlsx(_) => TableFormat::Xlsx,
            OutputTable::Delimited(table) => table.format(),
        }
    }
}

impl TableStore for OutputTable {
    fn rows(&self) -> &[Vec<String>] {
        match self {
            OutputTable::Xlsx(table) => table.rows(),
            OutputTable::Delimited(table) => table.rows(),
        }
    }

    fn append_row(&mut self, row: Vec<String>) -> usize {
        match self {
            OutputTable::Xlsx(table) => table.append_row(row),
            OutputTable::Delimited(table) => table.append_row(row),
        }
    }

    fn unpersisted_rows(&self) -> usize {
        match self {
            OutputTable::Xlsx(table) => table.unpersisted_rows(),
            OutputTable::Delimited(table) => table.unpersisted_rows(),
        }
    }

    fn persist(&mut self) -> TableResult<()> {
        match self {
            OutputTable::Xlsx(table) => table.persist(),
            OutputTable::Delimited(table) => table.persist(),
        }
    }
}

/// Hidden staging path next to `target`: `dir/.name.tmp`.
pub fn staging_path(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "table".to_string());
    let staged = format!(".{file_name}.tmp");
    match target.parent() {
        Some(parent) => parent.join(staged),
        None => PathBuf::from(staged),
    }
}

/// Write `target` through its staging path: `write` fills the staged file,
/// which is then synced and renamed over `target`. The staged file is
/// removed if any step fails.
pub fn replace_file<F>(target: &Path, write: F) -> TableResult<()>
where
    F: FnOnce(&mut File) -> TableResult<()>,
{
    let temp_path = staging_path(target);
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| TableError::Io { path, source }
    };

    let result = File::create(&temp_path)
        .map_err(io_err(&temp_path))
        .and_then(|mut file| {
            write(&mut file)?;
            file.sync_all().map_err(io_err(&temp_path))
        })
        .and_then(|()| std::fs::rename(&temp_path, target).map_err(io_err(target)));

    if result.is_err() && temp_path.exists() {
        if let Err(err) = std::fs::remove_file(&temp_path) {
            warn!(path = %temp_path.display(), error = %err, "Failed to remove staged file");
        }
    }
    result
}
