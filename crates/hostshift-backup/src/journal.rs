use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::layout::{current_unix_timestamp, BackupLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEvent {
    Push,
    Partition,
    Frozen,
    Restored,
    Skipped,
    Failed,
    Commit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub seq: u64,
    pub event: JournalEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at_unix: u64,
}

/// Append-only JSON-lines record of what the ledger did during one run, kept
/// on disk so an operator can finish a rollback by hand.
#[derive(Debug)]
pub struct LedgerJournal {
    path: PathBuf,
    next_seq: u64,
}

impl LedgerJournal {
    pub fn create(layout: &BackupLayout, run_id: &str) -> Result<Self> {
        let path = layout.journal_path(run_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("failed to create ledger journal: {}", path.display()))?;

        Ok(Self { path, next_seq: 1 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(
        &mut self,
        event: JournalEvent,
        item: Option<(u64, &str)>,
        detail: Option<&str>,
    ) -> Result<()> {
        let record = JournalRecord {
            seq: self.next_seq,
            event,
            item_id: item.map(|(id, _)| id),
            item: item.map(|(_, description)| description.to_string()),
            detail: detail.map(str::to_string),
            at_unix: current_unix_timestamp()?,
        };
        let line = serde_json::to_string(&record).context("failed to encode journal record")?;

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open ledger journal: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .and_then(|()| file.flush())
            .with_context(|| format!("failed to append ledger journal: {}", self.path.display()))?;

        self.next_seq += 1;
        Ok(())
    }
}

pub fn read_journal_records(path: &Path) -> Result<Vec<JournalRecord>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read ledger journal: {}", path.display()));
        }
    };

    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| {
                format!(
                    "invalid ledger journal line {} in {}",
                    index + 1,
                    path.display()
                )
            })
        })
        .collect()
}
