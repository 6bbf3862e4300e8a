use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::fs_utils::{copy_file_with_parents, sha256_file_hex};
use crate::item::RestoreOutcome;
use crate::layout::BackupLayout;

#[derive(Debug, Clone, PartialEq, Eq)]
enum FileSnapshot {
    Absent,
    Saved { backup_path: PathBuf, sha256: String },
}

/// Keeps the original content of a single file.
///
/// Enabling copies the current bytes aside before the caller changes the
/// file. Restoring puts them back, or removes the file when it did not exist
/// before the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBackup {
    path: PathBuf,
    backup_path: PathBuf,
    snapshot: Option<FileSnapshot>,
}

impl FileBackup {
    pub fn new(layout: &BackupLayout, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let backup_path = layout.file_backup_path(&path);
        Self {
            path,
            backup_path,
            snapshot: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn existed_before(&self) -> Option<bool> {
        self.snapshot
            .as_ref()
            .map(|snapshot| matches!(snapshot, FileSnapshot::Saved { .. }))
    }

    pub(crate) fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    pub(crate) fn enable(&mut self) -> Result<()> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no original file to back up");
            self.snapshot = Some(FileSnapshot::Absent);
            return Ok(());
        }

        if !self.path.is_file() {
            return Err(anyhow!(
                "cannot back up {}: not a regular file",
                self.path.display()
            ));
        }

        copy_file_with_parents(&self.path, &self.backup_path)
            .with_context(|| format!("failed to back up {}", self.path.display()))?;
        let sha256 = sha256_file_hex(&self.backup_path)?;
        info!(
            path = %self.path.display(),
            backup = %self.backup_path.display(),
            "backed up file"
        );
        self.snapshot = Some(FileSnapshot::Saved {
            backup_path: self.backup_path.clone(),
            sha256,
        });
        Ok(())
    }

    pub(crate) fn restore(&mut self) -> Result<RestoreOutcome> {
        match &self.snapshot {
            None => Ok(RestoreOutcome::Skipped("no snapshot was taken".to_string())),
            Some(FileSnapshot::Absent) => self.remove_created_file(),
            Some(FileSnapshot::Saved {
                backup_path,
                sha256,
            }) => {
                let actual = sha256_file_hex(backup_path).with_context(|| {
                    format!("backup of {} is unreadable", self.path.display())
                })?;
                if &actual != sha256 {
                    return Err(anyhow!(
                        "backup of {} was modified (expected sha256 {sha256}, found {actual})",
                        self.path.display()
                    ));
                }

                copy_file_with_parents(backup_path, &self.path)
                    .with_context(|| format!("failed to restore {}", self.path.display()))?;
                info!(path = %self.path.display(), "restored file from backup");
                Ok(RestoreOutcome::Restored)
            }
        }
    }

    fn remove_created_file(&self) -> Result<RestoreOutcome> {
        if !self.path.exists() {
            let reason = format!("{} was never created", self.path.display());
            warn!("{reason}; nothing to remove");
            return Ok(RestoreOutcome::Skipped(reason));
        }

        fs::remove_file(&self.path)
            .with_context(|| format!("failed to remove {}", self.path.display()))?;
        info!(path = %self.path.display(), "removed file created during the run");
        Ok(RestoreOutcome::Restored)
    }
}
