use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Directory tree under the backup root where one conversion run keeps
/// everything it needs to undo itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupLayout {
    root: PathBuf,
}

impl BackupLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.root.join("repos")
    }

    pub fn repo_files_dir(&self) -> PathBuf {
        self.repos_dir().join("yum.repos.d")
    }

    pub fn repo_vars_dir(&self) -> PathBuf {
        self.repos_dir().join("vars")
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.root.join("journal")
    }

    pub fn journal_path(&self, run_id: &str) -> PathBuf {
        self.journal_dir().join(format!("{run_id}.jsonl"))
    }

    /// Backup location for `original`. The name keeps the original file name
    /// readable and prefixes a digest of the full path so that two files with
    /// the same name never collide.
    pub fn file_backup_path(&self, original: &Path) -> PathBuf {
        let digest = Sha256::digest(original.as_os_str().as_encoded_bytes());
        let prefix = hex::encode(&digest[..8]);
        let file_name = original
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        self.files_dir().join(format!("{prefix}-{file_name}"))
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.files_dir(),
            self.packages_dir(),
            self.repo_files_dir(),
            self.repo_vars_dir(),
            self.journal_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_secs())
}

pub fn new_run_id(started_at_unix: u64) -> String {
    format!("run-{started_at_unix}-{}", std::process::id())
}
