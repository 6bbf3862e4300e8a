use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing::warn;
use tracing_subscriber::EnvFilter;

pub const LOG_DIR: &str = "/var/log/hostshift";
pub const LOG_FILE_NAME: &str = "hostshift.log";

pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILE_NAME)
}

/// Moves the log of a previous run to `archive/hostshift-<timestamp>.log`.
pub fn archive_previous_log(log_dir: &Path, timestamp: u64) -> Result<Option<PathBuf>> {
    let current = log_file_path(log_dir);
    if !current.exists() {
        return Ok(None);
    }

    let archive_dir = log_dir.join("archive");
    fs::create_dir_all(&archive_dir)
        .with_context(|| format!("failed to create {}", archive_dir.display()))?;
    let archived = archive_dir.join(format!("hostshift-{timestamp}.log"));
    fs::rename(&current, &archived).with_context(|| {
        format!(
            "failed to archive {} to {}",
            current.display(),
            archived.display()
        )
    })?;
    Ok(Some(archived))
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--debug`.
pub fn log_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }))
}

/// Log file opened for a new run.
#[derive(Debug)]
pub struct RunLog {
    pub path: PathBuf,
    pub file: File,
    /// Why the previous log could not be archived. The new run then appends
    /// to it.
    pub archive_error: Option<anyhow::Error>,
}

pub fn open_run_log(log_dir: &Path, timestamp: u64) -> Result<RunLog> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    let archive_error = archive_previous_log(log_dir, timestamp).err();

    let path = log_file_path(log_dir);
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    Ok(RunLog {
        path,
        file,
        archive_error,
    })
}

pub fn init_logging(log_dir: &Path, debug: bool, timestamp: u64) -> Result<PathBuf> {
    let RunLog {
        path,
        file,
        archive_error,
    } = open_run_log(log_dir, timestamp)?;

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(debug))
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|err| anyhow!("failed to initialize logging: {err}"))?;

    if let Some(err) = archive_error {
        eprintln!("warning: unable to archive previous log: {err:#}");
        warn!("unable to archive previous log: {err:#}");
    }
    Ok(path)
}
