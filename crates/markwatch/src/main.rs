//! Markwatch CLI
//!
//! Usage:
//!     markwatch --input marks.txt --output marks.xlsx

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use markwatch::{CancellationToken, MarkwatchConfig, Pipeline};
use markwatch_logging::{default_logs_dir, init_logging, LogConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "markwatch",
    version,
    about = "Watch a text file for mark blocks and record unique ones in a table"
)]
struct Cli {
    /// Path to input file containing mark data
    #[arg(short = 'i', long)]
    input: PathBuf,

    /// Path to output table (.xlsx, .csv or .tsv)
    #[arg(short = 'o', long, default_value = "output.xlsx")]
    output: PathBuf,

    /// TOML configuration file
    #[arg(short = 'c', long, env = "MARKWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Poll interval in milliseconds (overrides config)
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Backoff after a failed poll in milliseconds (overrides config)
    #[arg(long)]
    error_backoff_ms: Option<u64>,

    /// Persist the read cursor here so restarts resume instead of rescanning
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Also write logs to daily rotated files in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Write logs to the default log directory (~/.markwatch/logs)
    #[arg(long)]
    log_file: bool,

    /// Log debug detail. Without it stderr shows info, or only warnings
    /// when logging to a file
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if !cli.input.exists() {
        eprintln!("Error: Input file '{}' does not exist", cli.input.display());
        eprintln!("{}", Cli::command().render_usage());
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;

    let log_dir = match (&config.log_dir, cli.log_file) {
        (Some(dir), _) => Some(dir.clone()),
        (None, true) => Some(default_logs_dir()?),
        (None, false) => None,
    };
    let _log_guard = init_logging(LogConfig {
        app_name: "markwatch",
        verbose: cli.verbose,
        log_dir: log_dir.as_deref(),
    })?;

    let input = std::fs::canonicalize(&cli.input)
        .with_context(|| format!("Failed to resolve input path {}", cli.input.display()))?;
    ensure_parent_dir(&cli.output)?;

    let mut pipeline = Pipeline::open(&input, &cli.output, &config)
        .with_context(|| format!("Failed to open output {}", cli.output.display()))?;

    info!(input = %input.display(), output = %cli.output.display(), "Press Ctrl+C to stop");

    let cancel = CancellationToken::new();
    install_signal_handlers(cancel.clone())?;

    let stats = pipeline.run(&cancel);
    info!(
        inserted = stats.inserted,
        duplicates = stats.duplicates,
        flush_failures = stats.flush_failures,
        "Shutdown complete"
    );
    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<MarkwatchConfig> {
    let mut config = match &cli.config {
        Some(path) => MarkwatchConfig::load(path)?,
        None => MarkwatchConfig::default(),
    };

    if let Some(ms) = cli.poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(ms) = cli.error_backoff_ms {
        config.error_backoff_ms = ms;
    }
    if let Some(path) = &cli.checkpoint {
        config.checkpoint_path = Some(path.clone());
    }
    if let Some(dir) = &cli.log_dir {
        config.log_dir = Some(dir.clone());
    }

    config.validate()?;
    Ok(config)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
    }
    Ok(())
}

fn install_signal_handlers(cancel: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        std::thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, shutting down...", sig);
                cancel.cancel();
            }
        });
    }

    #[cfg(windows)]
    {
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, shutting down...");
            cancel.cancel();
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["markwatch", "-i", "marks.txt"]).unwrap();
        assert_eq!(cli.output, PathBuf::from("output.xlsx"));
        assert!(cli.checkpoint.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_input_is_required() {
        assert!(Cli::try_parse_from(["markwatch", "-o", "out.csv"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "markwatch",
            "--input",
            "marks.txt",
            "--poll-interval-ms",
            "50",
            "--checkpoint",
            "cursor.json",
        ])
        .unwrap();
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.error_backoff_ms, 1000);
        assert_eq!(config.checkpoint_path, Some(PathBuf::from("cursor.json")));
    }

    #[test]
    fn test_ensure_parent_dir_creates_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("a/b/marks.csv");
        ensure_parent_dir(&output).unwrap();
        assert!(dir.path().join("a/b").is_dir());
        ensure_parent_dir(Path::new("marks.csv")).unwrap();
    }
}
