//! End-to-end tests for Markwatch
//!
//! These drive the full pipeline against real files: an input file that is
//! appended to, truncated and rewritten between polls, and a CSV output that
//! is reopened to simulate restarts.

use markwatch::record::HEADER;
use markwatch::{MarkwatchConfig, Pipeline, Record};
use markwatch_sinks::{DelimitedTable, TableStore, XlsxTable};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

/// Create a test environment with temp directories
struct TestEnv {
    /// Temp directory (cleaned up on drop)
    _temp: TempDir,
    pub input: PathBuf,
    pub output: PathBuf,
    pub checkpoint: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let input = temp.path().join("marks.txt");
        let output = temp.path().join("out").join("marks.csv");
        let checkpoint = temp.path().join("cursor.json");

        fs::create_dir_all(output.parent().unwrap()).expect("Failed to create output dir");
        fs::write(&input, "").expect("Failed to create input");

        Self {
            _temp: temp,
            input,
            output,
            checkpoint,
        }
    }

    fn append(&self, text: &str) {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.input)
            .expect("Failed to open input");
        file.write_all(text.as_bytes()).expect("Failed to append");
    }

    fn truncate(&self) {
        fs::write(&self.input, "").expect("Failed to truncate input");
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::open(&self.input, &self.output, &MarkwatchConfig::default())
            .expect("Failed to open pipeline")
    }

    fn pipeline_with_checkpoint(&self) -> Pipeline {
        let config = MarkwatchConfig {
            checkpoint_path: Some(self.checkpoint.clone()),
            ..MarkwatchConfig::default()
        };
        Pipeline::open(&self.input, &self.output, &config).expect("Failed to open pipeline")
    }

    fn stored_rows(&self) -> Vec<Vec<String>> {
        let table = DelimitedTable::open_or_create(&self.output, &HEADER)
            .expect("Failed to reopen output");
        table.rows().to_vec()
    }
}

fn block(date: &str, time: &str, payload: &str) -> String {
    format!("&[({date} {time})\n{payload}\n&]\n")
}

fn row(date: &str, time: &str, payload: &str) -> Vec<String> {
    Record::new(date, time, payload).to_row()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_identical_block_later_is_skipped() {
    let env = TestEnv::new();
    let mut pipeline = env.pipeline();

    env.append("&[(2024-01-01 12:00:00)\nTemp=20C\n&]\n");
    let first = pipeline.poll_once().unwrap();
    assert_eq!(first.inserted, 1);
    assert_eq!(first.duplicates, 0);

    env.append("&[(2024-01-01 12:00:00)\nTemp=20C\n&]\n");
    let second = pipeline.poll_once().unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 1);
    assert!(!second.flushed);

    assert_eq!(env.stored_rows(), vec![row("2024-01-01", "12:00:00", "Temp=20C")]);
}

#[test]
fn test_two_blocks_in_one_cycle_keep_document_order() {
    let env = TestEnv::new();
    let mut pipeline = env.pipeline();

    env.append(&block("2024-01-02", "09:00:00", "later date first"));
    env.append(&block("2024-01-01", "08:00:00", "earlier date second"));
    let report = pipeline.poll_once().unwrap();

    assert_eq!(report.inserted, 2);
    assert!(report.flushed);
    assert_eq!(pipeline.stats().flushes, 1);
    assert_eq!(
        env.stored_rows(),
        vec![
            row("2024-01-02", "09:00:00", "later date first"),
            row("2024-01-01", "08:00:00", "earlier date second"),
        ]
    );
}

// ============================================================================
// Cursor behaviour
// ============================================================================

#[test]
fn test_cursor_equals_bytes_appended() {
    let env = TestEnv::new();
    let mut pipeline = env.pipeline();
    let mut total = 0u64;

    for i in 0..5 {
        let text = format!("log line {i}\n{}", block("d", &format!("t{i}"), "p"));
        env.append(&text);
        total += text.len() as u64;
        pipeline.poll_once().unwrap();
        assert_eq!(pipeline.cursor().offset, total);
    }
    assert_eq!(env.stored_rows().len(), 5);
}

#[test]
fn test_block_split_across_polls_is_stored_once() {
    let env = TestEnv::new();
    let mut pipeline = env.pipeline();

    env.append("&[(2024-01-01 12:00:00)\nTem");
    let first = pipeline.poll_once().unwrap();
    assert_eq!(first.inserted, 0);
    assert!(pipeline.pending_len() > 0);
    assert_eq!(pipeline.committed_offset(), 0);

    env.append("p=20C\n&]\n");
    let second = pipeline.poll_once().unwrap();
    assert_eq!(second.inserted, 1);
    assert_eq!(pipeline.pending_len(), 0);

    assert_eq!(env.stored_rows(), vec![row("2024-01-01", "12:00:00", "Temp=20C")]);
}

#[test]
fn test_truncation_recovery() {
    let env = TestEnv::new();
    let mut pipeline = env.pipeline();

    env.append(&block("d1", "t1", "before rotation"));
    env.append(&block("d1", "t2", "more before rotation"));
    pipeline.poll_once().unwrap();

    env.truncate();
    env.append(&block("d2", "t1", "after rotation"));
    let report = pipeline.poll_once().unwrap();

    assert!(report.rewound);
    assert_eq!(report.inserted, 1);
    assert_eq!(env.stored_rows().len(), 3);
    assert_eq!(env.stored_rows()[2], row("d2", "t1", "after rotation"));
}

#[test]
fn test_missing_input_recovers_when_file_returns() {
    let env = TestEnv::new();
    let mut pipeline = env.pipeline();

    fs::remove_file(&env.input).unwrap();
    let err = pipeline.poll_once().unwrap_err();
    assert!(err.is_transient());

    fs::write(&env.input, block("d", "t", "back")).unwrap();
    let report = pipeline.poll_once().unwrap();
    assert_eq!(report.inserted, 1);
}

// ============================================================================
// Restarts
// ============================================================================

#[test]
fn test_restart_rescan_adds_no_rows() {
    let env = TestEnv::new();
    env.append(&block("d", "t1", "a"));
    env.append(&block("d", "t2", "b"));

    {
        let mut pipeline = env.pipeline();
        assert_eq!(pipeline.poll_once().unwrap().inserted, 2);
    }

    let mut restarted = env.pipeline();
    assert_eq!(restarted.dedup().len(), 2);
    let report = restarted.poll_once().unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.duplicates, 2);
    assert_eq!(env.stored_rows().len(), 2);
}

#[test]
fn test_restart_appends_after_existing_rows() {
    let env = TestEnv::new();
    env.append(&block("d", "t1", "a"));
    env.pipeline().poll_once().unwrap();

    env.append(&block("d", "t2", "b"));
    let mut restarted = env.pipeline();
    assert_eq!(restarted.sink().next_row(), 3);
    assert_eq!(restarted.poll_once().unwrap().inserted, 1);

    assert_eq!(
        env.stored_rows(),
        vec![row("d", "t1", "a"), row("d", "t2", "b")]
    );
}

#[test]
fn test_checkpoint_resumes_at_committed_offset() {
    let env = TestEnv::new();
    let settled = block("d", "t1", "a");
    env.append(&settled);
    env.append("&[(d t2)\npart");

    {
        let mut pipeline = env.pipeline_with_checkpoint();
        pipeline.poll_once().unwrap();
        assert_eq!(pipeline.committed_offset(), settled.len() as u64);
    }

    env.append("ial\n&]\n");
    let mut restarted = env.pipeline_with_checkpoint();
    assert_eq!(restarted.cursor().offset, settled.len() as u64);

    let report = restarted.poll_once().unwrap();
    // Only the unfinished block is reread; the first is not even seen again.
    assert_eq!(report.inserted, 1);
    assert_eq!(report.duplicates, 0);
    assert_eq!(
        env.stored_rows(),
        vec![row("d", "t1", "a"), row("d", "t2", "partial")]
    );
}

#[test]
fn test_checkpoint_ignored_after_truncation() {
    let env = TestEnv::new();
    env.append(&block("d", "t1", "a much longer first payload"));
    env.pipeline_with_checkpoint().poll_once().unwrap();

    env.truncate();
    env.append(&block("d", "t2", "b"));
    let mut restarted = env.pipeline_with_checkpoint();
    assert_eq!(restarted.cursor().offset, 0);
    assert_eq!(restarted.poll_once().unwrap().inserted, 1);
}

#[test]
fn test_workbook_output_survives_restart() {
    let env = TestEnv::new();
    let output = env.output.with_extension("xlsx");
    env.append(&block("d", "t1", "a"));

    {
        let mut pipeline =
            Pipeline::open(&env.input, &output, &MarkwatchConfig::default()).unwrap();
        assert_eq!(pipeline.poll_once().unwrap().inserted, 1);
    }

    env.append(&block("d", "t2", "b"));
    let mut restarted = Pipeline::open(&env.input, &output, &MarkwatchConfig::default()).unwrap();
    let report = restarted.poll_once().unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.duplicates, 1);

    let table = XlsxTable::open_or_create(&output, &HEADER).unwrap();
    assert_eq!(table.rows(), &[row("d", "t1", "a"), row("d", "t2", "b")]);
}

#[test]
fn test_log_noise_with_markers_does_not_delay_records() {
    let env = TestEnv::new();
    let config = MarkwatchConfig {
        max_pending_bytes: 64,
        ..MarkwatchConfig::default()
    };
    let mut pipeline = Pipeline::open(&env.input, &env.output, &config).unwrap();

    env.append("warn: buffer &[ overflow\n");
    env.append(&"noise line\n".repeat(10));
    env.append("&[(2024-01-01 12:00:00)\nTem");
    pipeline.poll_once().unwrap();
    assert_eq!(pipeline.stats().dropped_pending_bytes, 0);

    env.append("p=20C\n&]\n");
    assert_eq!(pipeline.poll_once().unwrap().inserted, 1);
    assert_eq!(env.stored_rows(), vec![row("2024-01-01", "12:00:00", "Temp=20C")]);
}
