//! Mark block extraction.
//!
//! A block is an opening marker with a parenthesised `(date time)` pair, one
//! payload line, and a closing marker:
//!
//! ```text
//! &[(2024-01-01 12:00:00)
//! Temp=20C
//! &]
//! ```
//!
//! Matching runs on raw bytes so a UTF-8 sequence cut by a read boundary is
//! never decoded early. Bytes that may still grow into a block (an opening
//! marker without a closing one) are reported as unconsumed so the caller can
//! prepend them to the next read.

use crate::record::Record;
use once_cell::sync::Lazy;
use regex::bytes::Regex;

const OPEN_MARKER: &[u8] = b"&[";
const CLOSE_MARKER: &[u8] = b"&]";

/// `.` must not cross lines, and must accept any byte, hence `(?-u)`.
static BLOCK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u)&\[\((.*?) (.*?)\)\r?\n(.*?)\r?\n&\]").expect("block pattern is valid")
});

/// Result of scanning one buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extraction {
    /// Records in document order.
    pub records: Vec<Record>,
    /// Length of the buffer prefix that can be discarded. Bytes after it may
    /// be the start of a block that is not fully written yet.
    pub consumed: usize,
}

/// Stateless block extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Extractor;

impl Extractor {
    pub fn new() -> Self {
        Self
    }

    /// All complete blocks in `buffer`.
    pub fn extract(&self, buffer: &[u8]) -> Vec<Record> {
        self.extract_with_tail(buffer).records
    }

    /// All complete blocks in `buffer`, plus how much of it is settled.
    pub fn extract_with_tail(&self, buffer: &[u8]) -> Extraction {
        let mut records = Vec::new();
        let mut last_end = 0;

        for caps in BLOCK_PATTERN.captures_iter(buffer) {
            let (Some(whole), Some(date), Some(time), Some(payload)) =
                (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
            else {
                continue;
            };
            records.push(Record::new(
                String::from_utf8_lossy(date.as_bytes()),
                String::from_utf8_lossy(time.as_bytes()),
                String::from_utf8_lossy(payload.as_bytes()).trim(),
            ));
            last_end = whole.end();
        }

        let rest = &buffer[last_end..];
        let consumed = last_end + unsettled_start(rest).unwrap_or(rest.len());
        Extraction { records, consumed }
    }

    /// Where to cut an oversized carried tail: the next possible block start
    /// after its first byte, or its length when there is none.
    ///
    /// `unsettled` must be a tail left unconsumed by [`extract_with_tail`].
    ///
    /// [`extract_with_tail`]: Extractor::extract_with_tail
    pub fn restart_point(&self, unsettled: &[u8]) -> usize {
        if unsettled.len() <= 1 {
            return unsettled.len();
        }
        1 + unsettled_start(&unsettled[1..]).unwrap_or(unsettled.len() - 1)
    }
}

/// Offset within `rest` of the first byte that may still belong to an
/// unfinished block.
///
/// That is the first opening marker after the last closing marker from which
/// a block can still be completed by appending more bytes. A trailing lone
/// `&` also counts, since the next read may complete it into an opening
/// marker.
fn unsettled_start(rest: &[u8]) -> Option<usize> {
    let search_from = rfind(rest, CLOSE_MARKER)
        .map(|pos| pos + CLOSE_MARKER.len())
        .unwrap_or(0);
    let open_region = &rest[search_from..];

    let viable = open_region
        .windows(OPEN_MARKER.len())
        .enumerate()
        .filter(|(_, window)| *window == OPEN_MARKER)
        .map(|(pos, _)| pos)
        .find(|&pos| can_complete(&open_region[pos..]));
    if let Some(pos) = viable {
        return Some(search_from + pos);
    }
    if !open_region.is_empty() && open_region.ends_with(b"&") {
        return Some(rest.len() - 1);
    }
    None
}

/// Whether `tail`, which starts with an opening marker and holds no closing
/// marker, is a prefix of some complete block.
fn can_complete(tail: &[u8]) -> bool {
    let body = &tail[OPEN_MARKER.len()..];
    let mut lines = body.split(|&byte| byte == b'\n');
    let header = lines.next().unwrap_or_default();
    if !header.is_empty() && header[0] != b'(' {
        return false;
    }

    match (lines.next(), lines.next(), lines.next()) {
        // Header still being written.
        (None, _, _) => true,
        // Payload still being written.
        (Some(_), None, _) => is_complete_header(header),
        // Only the closing marker is missing.
        (Some(_), Some(close), None) => {
            is_complete_header(header) && CLOSE_MARKER.starts_with(close)
        }
        _ => false,
    }
}

/// `(date time)` with an optional trailing carriage return.
fn is_complete_header(line: &[u8]) -> bool {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    match line {
        [b'(', inner @ .., b')'] => inner.contains(&b' '),
        _ => false,
    }
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}
