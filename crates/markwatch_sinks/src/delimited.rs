//! CSV/TSV backed [`TableStore`].

use crate::{replace_file, HeaderSpec, TableError, TableFormat, TableResult, TableStore};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Delimited text table held fully in memory and rewritten on persist.
#[derive(Debug)]
pub struct DelimitedTable {
    path: PathBuf,
    format: TableFormat,
    delimiter: u8,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    /// Number of trailing rows in `rows` not yet on disk.
    unpersisted: usize,
}

impl DelimitedTable {
    /// Open the table at `path`, or create it with `header` if it does not exist.
    ///
    /// A new table is written to disk immediately so the header is present
    /// even before the first data row. An existing non-empty file must start
    /// with exactly `header`.
    pub fn open_or_create(path: impl AsRef<Path>, header: &[&str]) -> TableResult<Self> {
        Self::open_with(path, HeaderSpec::new(header))
    }

    /// Like [`DelimitedTable::open_or_create`], also accepting the header
    /// aliases in `header`.
    pub fn open_with(path: impl AsRef<Path>, header: HeaderSpec<'_>) -> TableResult<Self> {
        let path = path.as_ref().to_path_buf();
        let format = TableFormat::from_path(&path)?;
        let Some(delimiter) = format.delimiter() else {
            return Err(TableError::UnsupportedFormat { path });
        };

        let mut records = if path.exists() {
            read_records(&path, delimiter)?
        } else {
            Vec::new()
        };
        if records.is_empty() {
            let mut table = Self {
                path,
                format,
                delimiter,
                header: header.to_row(),
                rows: Vec::new(),
                unpersisted: 0,
            };
            table.write_document()?;
            info!(path = %table.path.display(), "Created table with header");
            return Ok(table);
        }

        let found = records.remove(0);
        let header = header.check(&path, found)?;

        info!(path = %path.display(), rows = records.len(), "Opened existing table");
        Ok(Self {
            path,
            format,
            delimiter,
            header,
            rows: records,
            unpersisted: 0,
        })
    }

    pub fn format(&self) -> TableFormat {
        self.format
    }

    fn write_document(&mut self) -> TableResult<()> {
        let temp_path = crate::staging_path(&self.path);
        let csv_err = |source| TableError::Csv {
            path: temp_path.clone(),
            source,
        };

        replace_file(&self.path, |file| {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(self.delimiter)
                .flexible(true)
                .from_writer(file);

            writer.write_record(&self.header).map_err(csv_err)?;
            for row in &self.rows {
                writer.write_record(row).map_err(csv_err)?;
            }
            writer.flush().map_err(|source| TableError::Io {
                path: temp_path.clone(),
                source,
            })
        })
    }
}

impl TableStore for DelimitedTable {
    fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    fn append_row(&mut self, row: Vec<String>) -> usize {
        self.rows.push(row);
        self.unpersisted += 1;
        self.rows.len() + 1
    }

    fn unpersisted_rows(&self) -> usize {
        self.unpersisted
    }

    fn persist(&mut self) -> TableResult<()> {
        self.write_document()?;
        debug!(
            path = %self.path.display(),
            rows = self.rows.len(),
            newly_persisted = self.unpersisted,
            "Persisted table"
        );
        self.unpersisted = 0;
        Ok(())
    }
}

fn read_records(path: &Path, delimiter: u8) -> TableResult<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|source| TableError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| TableError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        records.push(record.iter().map(str::to_string).collect());
    }
    Ok(records)
}
