//! Poll loop: reader → extractor → dedup → sink.
//!
//! All mutable state (cursor, carried tail, dedup set, sink) lives in one
//! [`Pipeline`] value and is only touched from the thread running it.
//!
//! ```text
//!   Idle ── no new bytes ──▶ sleep(poll_interval) ──▶ Idle
//!   Idle ── new bytes ─────▶ Processing ── batch flushed ──▶ Idle
//!   any  ── read/flush error ──▶ sleep(error_backoff) ──▶ Idle
//! ```

use crate::cancel::CancellationToken;
use crate::checkpoint::Checkpoint;
use crate::config::MarkwatchConfig;
use crate::dedup::DedupStore;
use crate::error::{MarkwatchError, Result};
use crate::extractor::Extractor;
use crate::reader::{TailCursor, TailReader};
use crate::record::Record;
use crate::sink::MarkSink;
use markwatch_sinks::{OutputTable, TableStore};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub bytes_read: u64,
    pub extracted: usize,
    pub inserted: usize,
    pub duplicates: usize,
    /// The output table was rewritten during this cycle.
    pub flushed: bool,
    /// The input shrank or was replaced and reading restarted at byte 0.
    pub rewound: bool,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.bytes_read == 0 && !self.rewound && !self.flushed
    }
}

/// Counters over the pipeline's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub cycles: u64,
    pub bytes_read: u64,
    pub extracted: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub flushes: u64,
    pub flush_failures: u64,
    pub read_errors: u64,
    pub rewinds: u64,
    /// Carried-over bytes discarded because no block completed in time.
    pub dropped_pending_bytes: u64,
}

pub struct Pipeline<S = OutputTable> {
    reader: TailReader,
    extractor: Extractor,
    dedup: DedupStore,
    sink: MarkSink<S>,
    cursor: TailCursor,
    /// Read bytes that may still become a block; prefixed to the next read.
    pending: Vec<u8>,
    max_pending_bytes: usize,
    poll_interval: Duration,
    error_backoff: Duration,
    checkpoint_path: Option<PathBuf>,
    last_checkpoint: Option<u64>,
    stats: PipelineStats,
}

impl Pipeline<OutputTable> {
    /// Open the output table at `output`, seed dedup state from it, and
    /// position the cursor (from the checkpoint when one applies).
    ///
    /// Fails only if the output cannot be opened; an unavailable input is
    /// retried by the loop.
    pub fn open(
        input: impl Into<PathBuf>,
        output: &Path,
        config: &MarkwatchConfig,
    ) -> Result<Self> {
        let mut dedup = DedupStore::new();
        let sink = MarkSink::open(output, &mut dedup)?;
        let mut pipeline = Self::new(input, sink, dedup, config);
        pipeline.resume_from_checkpoint();
        Ok(pipeline)
    }
}

impl<S: TableStore> Pipeline<S> {
    /// Build a pipeline over an already opened sink. `dedup` must have been
    /// seeded by that sink. The cursor starts at byte 0.
    pub fn new(
        input: impl Into<PathBuf>,
        sink: MarkSink<S>,
        dedup: DedupStore,
        config: &MarkwatchConfig,
    ) -> Self {
        Self {
            reader: TailReader::new(input).with_max_read_bytes(config.max_read_bytes),
            extractor: Extractor::new(),
            dedup,
            sink,
            cursor: TailCursor::start(),
            pending: Vec::new(),
            max_pending_bytes: config.max_pending_bytes,
            poll_interval: config.poll_interval(),
            error_backoff: config.error_backoff(),
            checkpoint_path: config.checkpoint_path.clone(),
            last_checkpoint: None,
            stats: PipelineStats::default(),
        }
    }

    pub fn cursor(&self) -> TailCursor {
        self.cursor
    }

    /// Offset of the first input byte not yet settled into records.
    pub fn committed_offset(&self) -> u64 {
        self.cursor.offset.saturating_sub(self.pending.len() as u64)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    pub fn sink(&self) -> &MarkSink<S> {
        &self.sink
    }

    /// Run one cycle.
    ///
    /// Read errors leave the cursor untouched. A flush error is returned
    /// after the cycle's records were accepted; they stay queued in the sink
    /// and the next cycle flushes them.
    pub fn poll_once(&mut self) -> Result<CycleReport> {
        self.stats.cycles += 1;

        let outcome = self.reader.poll(&self.cursor).map_err(|err| {
            self.stats.read_errors += 1;
            err
        })?;

        let mut report = CycleReport {
            bytes_read: outcome.bytes.len() as u64,
            rewound: outcome.rewound,
            ..CycleReport::default()
        };
        self.stats.bytes_read += report.bytes_read;

        if outcome.rewound {
            self.stats.rewinds += 1;
            if !self.pending.is_empty() {
                debug!(
                    discarded = self.pending.len(),
                    "Dropping carried bytes from previous file content"
                );
                self.pending.clear();
            }
        }
        self.cursor = outcome.cursor;

        if !outcome.bytes.is_empty() {
            self.pending.extend_from_slice(&outcome.bytes);
            let extraction = self.extractor.extract_with_tail(&self.pending);
            self.pending.drain(..extraction.consumed);
            self.enforce_pending_limit();

            report.extracted = extraction.records.len();
            self.stats.extracted += report.extracted as u64;
            for record in extraction.records {
                self.accept(record, &mut report);
            }
        }

        if self.sink.unflushed() > 0 {
            let rows = self.sink.unflushed();
            if let Err(err) = self.sink.flush() {
                self.stats.flush_failures += 1;
                return Err(err);
            }
            self.stats.flushes += 1;
            report.flushed = true;
            info!(rows, "Updated output with new entries");
        } else if report.extracted > 0 {
            info!("No new unique records to add");
        }

        self.save_checkpoint();
        Ok(report)
    }

    /// Poll until `cancel` fires, then flush what is left.
    pub fn run(&mut self, cancel: &CancellationToken) -> PipelineStats {
        info!(
            input = %self.reader.path().display(),
            offset = self.cursor.offset,
            known_records = self.dedup.len(),
            "Starting to monitor file"
        );

        while !cancel.is_cancelled() {
            let pause = match self.poll_once() {
                Ok(report) => {
                    if report.is_idle() {
                        debug!(offset = self.cursor.offset, "No new data");
                    }
                    self.poll_interval
                }
                Err(err @ MarkwatchError::OutputWrite(_)) => {
                    error!(
                        error = %err,
                        unflushed = self.sink.unflushed(),
                        "Failed to save output; will retry"
                    );
                    self.error_backoff
                }
                Err(err) => {
                    warn!(error = %err, "Poll failed; backing off");
                    self.error_backoff
                }
            };
            if cancel.sleep(pause) {
                break;
            }
        }

        self.shutdown();
        self.stats
    }

    fn accept(&mut self, record: Record, report: &mut CycleReport) {
        let key = record.key();
        if self.dedup.contains(&key) {
            report.duplicates += 1;
            self.stats.duplicates += 1;
            info!(
                date = %record.date,
                time = %record.time,
                data = %record.payload,
                "Duplicate record skipped"
            );
            return;
        }

        let row = self.sink.append(&record);
        self.dedup.record(key);
        report.inserted += 1;
        self.stats.inserted += 1;
        info!(
            row,
            date = %record.date,
            time = %record.time,
            data = %record.payload,
            "New mark data added"
        );
    }

    /// Drop carried bytes from the front, one candidate block at a time,
    /// until the tail fits. Later block starts are kept when they fit.
    fn enforce_pending_limit(&mut self) {
        if self.pending.len() <= self.max_pending_bytes {
            return;
        }
        let before = self.pending.len();
        while self.pending.len() > self.max_pending_bytes {
            let cut = self.extractor.restart_point(&self.pending);
            self.pending.drain(..cut);
        }
        let dropped = before - self.pending.len();
        warn!(
            dropped,
            kept = self.pending.len(),
            limit = self.max_pending_bytes,
            "Unfinished block exceeded carry-over limit; discarding it"
        );
        self.stats.dropped_pending_bytes += dropped as u64;
    }

    fn resume_from_checkpoint(&mut self) {
        let Some(path) = self.checkpoint_path.as_deref() else {
            return;
        };
        let checkpoint = match Checkpoint::load(path) {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "Ignoring unreadable checkpoint");
                return;
            }
        };
        let (size, identity) = match self.reader.stat() {
            Ok(stat) => stat,
            Err(err) => {
                warn!(error = %err, "Cannot stat input; ignoring checkpoint");
                return;
            }
        };
        if let Some(cursor) = checkpoint.resume_cursor(self.reader.path(), size, identity) {
            info!(offset = cursor.offset, "Resuming from checkpoint");
            self.cursor = cursor;
            self.last_checkpoint = Some(cursor.offset);
        }
    }

    /// Persist the committed offset once the records before it are durable.
    fn save_checkpoint(&mut self) {
        let Some(path) = self.checkpoint_path.as_deref() else {
            return;
        };
        if self.sink.unflushed() > 0 {
            return;
        }
        let offset = self.committed_offset();
        if self.last_checkpoint == Some(offset) {
            return;
        }

        let checkpoint = Checkpoint {
            input: self.reader.path().to_path_buf(),
            file_id: self.cursor.identity,
            offset,
        };
        match checkpoint.save(path) {
            Ok(()) => self.last_checkpoint = Some(offset),
            Err(err) => warn!(error = %err, "Failed to save checkpoint"),
        }
    }

    fn shutdown(&mut self) {
        if self.sink.unflushed() > 0 {
            match self.sink.flush() {
                Ok(()) => self.stats.flushes += 1,
                Err(err) => {
                    self.stats.flush_failures += 1;
                    error!(
                        error = %err,
                        unflushed = self.sink.unflushed(),
                        "Final flush failed; unsaved records will be re-extracted on restart"
                    );
                }
            }
        }
        self.save_checkpoint();
        info!(
            inserted = self.stats.inserted,
            duplicates = self.stats.duplicates,
            cycles = self.stats.cycles,
            "Stopped monitoring"
        );
    }
}
