//! Logging setup for Markwatch binaries.
//!
//! Console output always goes to stderr. When a log directory is configured,
//! the same events are also written (without ANSI colours) to a daily file
//! `<app>.<date>.log` through a non-blocking writer; only the newest
//! [`MAX_LOG_FILES`] files are kept.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "markwatch=info,markwatch_sinks=info";
const VERBOSE_LOG_FILTER: &str = "markwatch=debug,markwatch_sinks=debug";
const QUIET_LOG_FILTER: &str = "markwatch=warn,markwatch_sinks=warn";

/// Rotated log files kept in the log directory.
pub const MAX_LOG_FILES: usize = 7;

/// Options for [`init_logging`].
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Debug detail on stderr (and in the file).
    pub verbose: bool,
    /// Directory for the rotated log file. `None` disables file logging.
    pub log_dir: Option<&'a Path>,
}

/// Keeps the background file writer alive; drop it last so buffered lines
/// reach the file.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the built-in filters for both layers.
pub fn init_logging(config: LogConfig<'_>) -> Result<LogGuard> {
    let env_override = std::env::var("RUST_LOG").ok();
    let filter = |directives: &str| match &env_override {
        Some(env) => EnvFilter::new(env),
        None => EnvFilter::new(directives),
    };

    let (file_layer, guard) = match config.log_dir {
        Some(dir) => {
            let appender = file_appender(dir, config.app_name)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter(file_filter(config.verbose)));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_directives = console_filter(config.verbose, config.log_dir.is_some());
    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter(console_directives)),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogGuard { _file: guard })
}

/// Daily-rotated appender writing `<app_name>.<date>.log` under `dir`.
pub fn file_appender(dir: &Path, app_name: &str) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(app_name)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
        .with_context(|| format!("Failed to open log file in {}", dir.display()))
}

fn file_filter(verbose: bool) -> &'static str {
    if verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    }
}

/// With a log file the terminal only shows warnings unless verbose.
fn console_filter(verbose: bool, file_logging: bool) -> &'static str {
    match (verbose, file_logging) {
        (true, _) => VERBOSE_LOG_FILTER,
        (false, true) => QUIET_LOG_FILTER,
        (false, false) => DEFAULT_LOG_FILTER,
    }
}

/// Markwatch home directory: `$MARKWATCH_HOME` or `~/.markwatch`.
pub fn markwatch_home() -> Result<PathBuf> {
    if let Some(override_path) = std::env::var_os("MARKWATCH_HOME") {
        return Ok(PathBuf::from(override_path));
    }
    dirs::home_dir()
        .map(|home| home.join(".markwatch"))
        .context("Could not determine home directory")
}

/// Default log directory: `<home>/logs`.
pub fn default_logs_dir() -> Result<PathBuf> {
    Ok(markwatch_home()?.join("logs"))
}
