//! Markwatch - incremental mark extraction from a growing text file
//!
//! An external writer appends blocks like
//!
//! ```text
//! &[(2024-01-01 12:00:00)
//! Temp=20C
//! &]
//! ```
//!
//! to a file. Markwatch tails that file, extracts each block as a
//! [`Record`], drops records it has already stored, and appends the rest to a
//! tabular output file.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ TailReader  │     │  Extractor  │     │ DedupStore  │     │  MarkSink   │
//! │ (cursor +   │────▶│ (blocks +   │────▶│ (seen keys) │────▶│ (table +    │
//! │  identity)  │     │  tail)      │     │             │     │  flush)     │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                                                           │
//!        └──────────────────── Pipeline (poll loop) ─────────────────┘
//! ```

pub mod cancel;
pub mod checkpoint;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extractor;
pub mod pipeline;
pub mod reader;
pub mod record;
pub mod sink;

// Re-exports for convenience
pub use cancel::CancellationToken;
pub use checkpoint::Checkpoint;
pub use config::MarkwatchConfig;
pub use dedup::DedupStore;
pub use error::{MarkwatchError, Result};
pub use extractor::{Extraction, Extractor};
pub use pipeline::{CycleReport, Pipeline, PipelineStats};
pub use reader::{FileIdentity, ReadOutcome, TailCursor, TailReader};
pub use record::{Record, RecordKey};
pub use sink::MarkSink;
