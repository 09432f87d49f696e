//! Excel workbook backed [`TableStore`].
//!
//! Existing workbooks are read with `calamine`; every persist writes a
//! fresh single-sheet workbook with `rust_xlsxwriter`. The header row is
//! bold, thin-bordered and shaded.

use crate::{replace_file, HeaderSpec, TableError, TableResult, TableStore};
use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use rust_xlsxwriter::{Color, Format, FormatBorder, Workbook};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Sheet name given to newly created workbooks.
pub const NEW_SHEET_NAME: &str = "Mark Data";

const HEADER_FILL: u32 = 0xDDEBF7;

/// Single-sheet workbook held fully in memory and rewritten on persist.
#[derive(Debug)]
pub struct XlsxTable {
    path: PathBuf,
    sheet_name: String,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    unpersisted: usize,
}

impl XlsxTable {
    pub fn open_or_create(path: impl AsRef<Path>, header: &[&str]) -> TableResult<Self> {
        Self::open_with(path, HeaderSpec::new(header))
    }

    /// Open the workbook at `path`, or create it with `header`.
    ///
    /// Workbooks with more than one sheet are refused, since persisting
    /// writes back only the one sheet.
    pub fn open_with(path: impl AsRef<Path>, header: HeaderSpec<'_>) -> TableResult<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            let mut table = Self {
                path,
                sheet_name: NEW_SHEET_NAME.to_string(),
                header: header.to_row(),
                rows: Vec::new(),
                unpersisted: 0,
            };
            table.write_document()?;
            info!(path = %table.path.display(), "Created workbook with header");
            return Ok(table);
        }

        let (sheet_name, mut grid) = read_single_sheet(&path)?;
        if grid.is_empty() {
            let mut table = Self {
                path,
                sheet_name,
                header: header.to_row(),
                rows: Vec::new(),
                unpersisted: 0,
            };
            table.write_document()?;
            info!(path = %table.path.display(), "Initialised empty workbook with header");
            return Ok(table);
        }

        let found = grid.remove(0);
        let header = header.check(&path, found)?;
        info!(
            path = %path.display(),
            sheet = %sheet_name,
            rows = grid.len(),
            "Opened existing workbook"
        );
        Ok(Self {
            path,
            sheet_name,
            header,
            rows: grid,
            unpersisted: 0,
        })
    }

    fn write_document(&mut self) -> TableResult<()> {
        let xlsx_err = |source| TableError::XlsxWrite {
            path: self.path.clone(),
            source,
        };

        let mut workbook = Workbook::new();
        {
            let sheet = workbook.add_worksheet();
            sheet.set_name(self.sheet_name.as_str()).map_err(xlsx_err)?;

            let header_format = Format::new()
                .set_bold()
                .set_border(FormatBorder::Thin)
                .set_border_color(Color::Black)
                .set_background_color(Color::RGB(HEADER_FILL));
            for (col, cell) in self.header.iter().enumerate() {
                sheet
                    .write_string_with_format(0, column(col), cell.as_str(), &header_format)
                    .map_err(xlsx_err)?;
            }

            for (index, row) in self.rows.iter().enumerate() {
                let sheet_row = u32::try_from(index + 1).unwrap_or(u32::MAX);
                for (col, cell) in row.iter().enumerate() {
                    // Blank cells read back as empty strings.
                    if cell.is_empty() {
                        continue;
                    }
                    sheet
                        .write_string(sheet_row, column(col), cell.as_str())
                        .map_err(xlsx_err)?;
                }
            }
        }
        let buffer = workbook.save_to_buffer().map_err(xlsx_err)?;

        replace_file(&self.path, |file| {
            file.write_all(&buffer).map_err(|source| TableError::Io {
                path: self.path.clone(),
                source,
            })
        })
    }
}

impl TableStore for XlsxTable {
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
            "Persisted workbook"
        );
        self.unpersisted = 0;
        Ok(())
    }
}

/// Out-of-range columns are left for the writer to reject.
fn column(index: usize) -> u16 {
    u16::try_from(index).unwrap_or(u16::MAX)
}

fn read_single_sheet(path: &Path) -> TableResult<(String, Vec<Vec<String>>)> {
    let read_err = |source| TableError::XlsxRead {
        path: path.to_path_buf(),
        source,
    };

    let mut workbook: Xlsx<_> = open_workbook(path).map_err(read_err)?;
    let sheet_names = workbook.sheet_names();
    let sheet_name = match sheet_names.as_slice() {
        [only] => only.clone(),
        [] => {
            return Err(TableError::UnsupportedWorkbook {
                path: path.to_path_buf(),
                reason: "no worksheets".to_string(),
            })
        }
        many => {
            return Err(TableError::UnsupportedWorkbook {
                path: path.to_path_buf(),
                reason: format!("{} worksheets, expected one", many.len()),
            })
        }
    };

    let range = workbook.worksheet_range(&sheet_name).map_err(read_err)?;
    Ok((sheet_name, grid_rows(&range)))
}

/// Cell text laid out from A1, so leading blank rows and columns survive.
fn grid_rows(range: &Range<Data>) -> Vec<Vec<String>> {
    let Some((first_row, first_col)) = range.start() else {
        return Vec::new();
    };

    let mut rows: Vec<Vec<String>> = (0..first_row).map(|_| Vec::new()).collect();
    for cells in range.rows() {
        let mut row = vec![String::new(); first_col as usize];
        row.extend(cells.iter().map(cell_text));
        rows.push(row);
    }
    rows
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.clone(),
        other => other.to_string(),
    }
}
