//! Mark record model.

/// Column headers of the output table, in row order.
pub const HEADER: [&str; 3] = ["Date", "Time", "Data"];

/// Headers of tables written by earlier releases; still accepted on open.
pub const LEGACY_HEADERS: &[&[&str]] = &[&["Mark Date", "Mark Time", "Mark Data"]];

/// One extracted mark block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub date: String,
    pub time: String,
    pub payload: String,
}

/// Identity of a record: all three fields, compared exactly.
///
/// A structured key avoids the separator-collision problem of joining the
/// fields into a single string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    date: String,
    time: String,
    payload: String,
}

impl Record {
    pub fn new(
        date: impl Into<String>,
        time: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            date: date.into(),
            time: time.into(),
            payload: payload.into(),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            date: self.date.clone(),
            time: self.time.clone(),
            payload: self.payload.clone(),
        }
    }

    /// Cells in [`HEADER`] order.
    pub fn to_row(&self) -> Vec<String> {
        vec![self.date.clone(), self.time.clone(), self.payload.clone()]
    }

    /// Rebuild a record from stored cells. Rows with fewer than three cells
    /// are not records; extra cells are ignored.
    pub fn from_row(row: &[String]) -> Option<Self> {
        match row {
            [date, time, payload, ..] => Some(Self::new(
                date.as_str(),
                time.as_str(),
                payload.as_str(),
            )),
            _ => None,
        }
    }
}

impl From<Record> for RecordKey {
    fn from(record: Record) -> Self {
        RecordKey {
            date: record.date,
            time: record.time,
            payload: record.payload,
        }
    }
}
