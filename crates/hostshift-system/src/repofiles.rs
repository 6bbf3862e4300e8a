use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hostshift_backup::BackupLayout;
use tracing::{info, warn};

/// Copies of the repository definitions and yum variables as they were
/// before any package owning them was removed.
///
/// This is not a ledger item; rollback restores it through the legacy
/// cleanup hook once the partitioned part of the ledger is drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySnapshot {
    saved: Vec<SavedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SavedFile {
    original: PathBuf,
    backup: PathBuf,
}

impl RepositorySnapshot {
    pub fn capture(layout: &BackupLayout, repo_dir: &Path, vars_dir: &Path) -> Result<Self> {
        let mut saved = Vec::new();
        saved.extend(copy_matching(repo_dir, &layout.repo_files_dir(), |name| {
            name.ends_with(".repo")
        })?);
        saved.extend(copy_matching(vars_dir, &layout.repo_vars_dir(), |_| true)?);
        info!(files = saved.len(), "backed up repository files");
        Ok(Self { saved })
    }

    pub fn len(&self) -> usize {
        self.saved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }

    pub fn originals(&self) -> impl Iterator<Item = &Path> {
        self.saved.iter().map(|file| file.original.as_path())
    }

    /// Puts every saved file back. Returns how many were restored.
    pub fn restore(&self) -> Result<usize> {
        for file in &self.saved {
            if let Some(parent) = file.original.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::copy(&file.backup, &file.original).with_context(|| {
                format!(
                    "failed to restore {} from {}",
                    file.original.display(),
                    file.backup.display()
                )
            })?;
        }
        info!(files = self.saved.len(), "restored repository files");
        Ok(self.saved.len())
    }
}

fn copy_matching(
    source_dir: &Path,
    backup_dir: &Path,
    keep: impl Fn(&str) -> bool,
) -> Result<Vec<SavedFile>> {
    if !source_dir.is_dir() {
        warn!(dir = %source_dir.display(), "directory not found; nothing to back up");
        return Ok(Vec::new());
    }
    fs::create_dir_all(backup_dir)
        .with_context(|| format!("failed to create {}", backup_dir.display()))?;

    let mut entries = fs::read_dir(source_dir)
        .with_context(|| format!("failed to read {}", source_dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to read {}", source_dir.display()))?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut saved = Vec::new();
    for entry in entries {
        let original = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if !original.is_file() || !keep(&name) {
            continue;
        }
        let backup = backup_dir.join(&name);
        fs::copy(&original, &backup).with_context(|| {
            format!(
                "failed to back up {} to {}",
                original.display(),
                backup.display()
            )
        })?;
        saved.push(SavedFile { original, backup });
    }
    Ok(saved)
}
