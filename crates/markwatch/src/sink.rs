//! Mark sink: accepted records → output table.

use crate::dedup::DedupStore;
use crate::error::{MarkwatchError, Result};
use crate::record::{Record, HEADER, LEGACY_HEADERS};
use markwatch_sinks::{HeaderSpec, OutputTable, TableStore};
use std::path::Path;
use tracing::info;

/// Appends records to a [`TableStore`] and persists them in batches.
///
/// `append` only touches memory; `flush` rewrites the whole document. Call
/// `flush` once per poll cycle, not once per record.
#[derive(Debug)]
pub struct MarkSink<S = OutputTable> {
    store: S,
}

impl MarkSink<OutputTable> {
    /// Open (or create with a `Date | Time | Data` header) the table at
    /// `path` and seed `dedup` with every stored row. The backend follows
    /// the extension: `.xlsx`, `.csv`, `.tsv` or `.tab`.
    pub fn open(path: impl AsRef<Path>, dedup: &mut DedupStore) -> Result<Self> {
        let header = HeaderSpec::new(&HEADER).with_aliases(LEGACY_HEADERS);
        let store = OutputTable::open_or_create(path.as_ref(), header)
            .map_err(MarkwatchError::OutputOpen)?;
        info!(path = %path.as_ref().display(), format = ?store.format(), "Opened output");
        Ok(Self::from_store(store, dedup))
    }
}

impl<S: TableStore> MarkSink<S> {
    pub fn from_store(store: S, dedup: &mut DedupStore) -> Self {
        let seeded = dedup.seed(store.rows());
        info!(
            existing_rows = store.rows().len(),
            seeded_keys = seeded,
            "Loaded existing records to avoid duplicates"
        );
        Self { store }
    }

    /// 1-based sheet row the next appended record will occupy.
    pub fn next_row(&self) -> usize {
        self.store.rows().len() + 2
    }

    /// Append in memory. Returns the sheet row index used.
    pub fn append(&mut self, record: &Record) -> usize {
        self.store.append_row(record.to_row())
    }

    /// Rows appended but not yet persisted (including rows from failed flushes).
    pub fn unflushed(&self) -> usize {
        self.store.unpersisted_rows()
    }

    /// Persist the whole table. On failure the rows stay pending for the
    /// next flush.
    pub fn flush(&mut self) -> Result<()> {
        self.store.persist().map_err(MarkwatchError::OutputWrite)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[cfg(test)]
    pub(crate) fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_new_store_starts_at_row_two() {
        let dir = tempdir().unwrap();
        let mut dedup = DedupStore::new();
        let sink = MarkSink::open(dir.path().join("marks.csv"), &mut dedup).unwrap();
        assert_eq!(sink.next_row(), 2);
        assert!(dedup.is_empty());
    }

    #[test]
    fn test_open_existing_seeds_dedup_and_row_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("marks.csv");
        std::fs::write(
            &path,
            "Date,Time,Data\n2024-01-01,12:00:00,Temp=20C\n2024-01-01,12:01:00,Temp=21C\n",
        )
        .unwrap();

        let mut dedup = DedupStore::new();
        let mut sink = MarkSink::open(&path, &mut dedup).unwrap();
        assert_eq!(dedup.len(), 2);
        assert!(dedup.contains(&Record::new("2024-01-01", "12:00:00", "Temp=20C").key()));
        assert_eq!(sink.next_row(), 4);
        assert_eq!(sink.append(&Record::new("d", "t", "p")), 4);
    }

    #[test]
    fn test_append_does_not_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("marks.csv");
        let mut dedup = DedupStore::new();
        let mut sink = MarkSink::open(&path, &mut dedup).unwrap();

        sink.append(&Record::new("d", "t", "p"));
        assert_eq!(sink.unflushed(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Date,Time,Data\n");

        sink.flush().unwrap();
        assert_eq!(sink.unflushed(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Date,Time,Data\nd,t,p\n");
    }

    #[test]
    fn test_unsupported_output_is_fatal_open_error() {
        let dir = tempdir().unwrap();
        let mut dedup = DedupStore::new();
        let err = MarkSink::open(dir.path().join("marks.ods"), &mut dedup).unwrap_err();
        assert!(matches!(err, MarkwatchError::OutputOpen(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_workbook_output_round_trips_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("output.xlsx");
        {
            let mut dedup = DedupStore::new();
            let mut sink = MarkSink::open(&path, &mut dedup).unwrap();
            sink.append(&Record::new("2024-01-01", "12:00:00", "Temp=20C"));
            sink.flush().unwrap();
        }

        let mut dedup = DedupStore::new();
        let sink = MarkSink::open(&path, &mut dedup).unwrap();
        assert_eq!(sink.next_row(), 3);
        assert!(dedup.contains(&Record::new("2024-01-01", "12:00:00", "Temp=20C").key()));
    }

    #[test]
    fn test_legacy_header_is_accepted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("marks.csv");
        std::fs::write(&path, "Mark Date,Mark Time,Mark Data\nd,t,p\n").unwrap();

        let mut dedup = DedupStore::new();
        MarkSink::open(&path, &mut dedup).unwrap();
        assert!(dedup.contains(&Record::new("d", "t", "p").key()));
    }
}
