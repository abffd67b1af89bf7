//! Run log: every progress message goes to stdout and to the run's log file.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// `{unix timestamp}.log` in the working directory.
pub fn default_log_path() -> PathBuf {
    PathBuf::from(format!("{}.log", chrono::Utc::now().timestamp()))
}

pub fn level_for(debug: bool) -> Level {
    if debug {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

/// Installs the global subscriber. Call once, before the orchestrator runs.
pub fn init(log_path: &Path, debug: bool) -> Result<()> {
    let file = File::create(log_path)
        .with_context(|| format!("Failed to create log file {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_max_level(level_for(debug))
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stdout.and(Mutex::new(file)))
        .try_init()
        .map_err(|e| anyhow!("Failed to install logger: {e}"))
}
