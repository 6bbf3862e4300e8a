use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::error::ProgramLogicError;
use crate::host::HostServices;
use crate::item::{ItemId, RestorableItem, RestoreOutcome};
use crate::journal::{JournalEvent, LedgerJournal};

/// Marker separating the items pushed before it from the ones pushed after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionId(u64);

impl PartitionId {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
enum LedgerEntry {
    Item(RestorableItem),
    Partition(PartitionId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreFailure {
    pub item: String,
    pub error: String,
}

/// What a drain of the ledger did, in the order it did it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub restored: Vec<String>,
    pub skipped: Vec<String>,
    pub failures: Vec<RestoreFailure>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.restored.len() + self.skipped.len() + self.failures.len()
    }

    pub fn merge(&mut self, other: RollbackReport) {
        self.restored.extend(other.restored);
        self.skipped.extend(other.skipped);
        self.failures.extend(other.failures);
    }

    pub fn record_failure(&mut self, item: impl Into<String>, error: &anyhow::Error) {
        self.failures.push(RestoreFailure {
            item: item.into(),
            error: format!("{error:#}"),
        });
    }
}

/// Ordered ledger of every restorable change made during one conversion run.
///
/// Items are appended in mutation order and consumed strictly last-in,
/// first-out. The ledger never looks at what an item restores.
#[derive(Debug, Default)]
pub struct BackupController {
    entries: Vec<LedgerEntry>,
    known_items: HashSet<ItemId>,
    next_partition: u64,
    frozen: bool,
    journal: Option<LedgerJournal>,
}

impl BackupController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: LedgerJournal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::default()
        }
    }

    pub fn journal_path(&self) -> Option<&Path> {
        self.journal.as_ref().map(LedgerJournal::path)
    }

    /// Number of items on the ledger, not counting partition markers.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, LedgerEntry::Item(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Turns the ledger drain-only. Pushes after this are logic errors.
    pub fn freeze(&mut self) {
        if !self.frozen {
            self.frozen = true;
            self.record(JournalEvent::Frozen, None, None);
        }
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.entries
            .iter()
            .any(|entry| matches!(entry, LedgerEntry::Item(item) if item.id() == id))
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                LedgerEntry::Item(item) => Some(item.describe()),
                LedgerEntry::Partition(_) => None,
            })
            .collect()
    }

    pub fn earliest_partition(&self) -> Option<PartitionId> {
        self.entries.iter().find_map(|entry| match entry {
            LedgerEntry::Partition(id) => Some(*id),
            LedgerEntry::Item(_) => None,
        })
    }

    /// Enables `item` unless that already happened, then appends it.
    ///
    /// A failed `enable` leaves nothing on the ledger. Duplicates and pushes
    /// onto a frozen ledger are rejected before `enable` runs.
    pub fn push(&mut self, mut item: RestorableItem, host: &mut HostServices<'_>) -> Result<ItemId> {
        let description = item.describe();
        if self.frozen {
            return Err(ProgramLogicError::new(format!(
                "cannot push {description}: the backup ledger is frozen for rollback"
            ))
            .into());
        }
        if self.known_items.contains(&item.id()) {
            return Err(ProgramLogicError::new(format!(
                "{description} was already pushed to the backup ledger"
            ))
            .into());
        }

        if !item.is_enabled() {
            item.enable(host)?;
        }

        let id = item.id();
        let description = item.describe();
        self.known_items.insert(id);
        self.entries.push(LedgerEntry::Item(item));
        debug!(item = %description, depth = self.entries.len(), "pushed restorable item");
        self.record(JournalEvent::Push, Some((id, &description)), None);
        Ok(id)
    }

    pub fn push_partition(&mut self) -> Result<PartitionId> {
        if self.frozen {
            return Err(ProgramLogicError::new(
                "cannot add a partition: the backup ledger is frozen for rollback",
            )
            .into());
        }

        self.next_partition += 1;
        let id = PartitionId(self.next_partition);
        self.entries.push(LedgerEntry::Partition(id));
        debug!(partition = id.0, "pushed ledger partition");
        self.record(
            JournalEvent::Partition,
            None,
            Some(&format!("partition {}", id.0)),
        );
        Ok(id)
    }

    /// Restores every item, newest first. Individual failures are logged and
    /// collected; the drain always reaches the oldest item.
    pub fn pop_all(&mut self, host: &mut HostServices<'_>) -> RollbackReport {
        let mut report = RollbackReport::default();
        while let Some(entry) = self.entries.pop() {
            match entry {
                LedgerEntry::Item(item) => self.restore_item(item, host, &mut report),
                LedgerEntry::Partition(id) => {
                    debug!(partition = id.0, "passed ledger partition");
                }
            }
        }
        report
    }

    /// Restores only the items pushed after `partition`, then drops the
    /// marker. Items pushed before it stay on the ledger.
    pub fn pop_to_partition(
        &mut self,
        partition: PartitionId,
        host: &mut HostServices<'_>,
    ) -> Result<RollbackReport> {
        let known = self
            .entries
            .iter()
            .any(|entry| matches!(entry, LedgerEntry::Partition(id) if *id == partition));
        if !known {
            return Err(ProgramLogicError::new(format!(
                "partition {} is not on the backup ledger",
                partition.0
            ))
            .into());
        }

        let mut report = RollbackReport::default();
        while let Some(entry) = self.entries.pop() {
            match entry {
                LedgerEntry::Partition(id) if id == partition => break,
                LedgerEntry::Partition(id) => {
                    debug!(partition = id.0, "passed nested ledger partition");
                }
                LedgerEntry::Item(item) => self.restore_item(item, host, &mut report),
            }
        }
        Ok(report)
    }

    /// Ends a successful run. The ledger is discarded without restoring.
    pub fn commit(mut self) {
        let remaining = self.len();
        self.entries.clear();
        self.record(
            JournalEvent::Commit,
            None,
            Some(&format!("{remaining} item(s) kept")),
        );
        info!(items = remaining, "conversion committed; backup ledger discarded");
    }

    fn restore_item(
        &mut self,
        mut item: RestorableItem,
        host: &mut HostServices<'_>,
        report: &mut RollbackReport,
    ) {
        let id = item.id();
        let description = item.describe();
        info!(item = %description, "restoring");

        match item.restore(host) {
            Ok(RestoreOutcome::Restored) => {
                self.record(JournalEvent::Restored, Some((id, &description)), None);
                report.restored.push(description);
            }
            Ok(RestoreOutcome::Skipped(reason)) => {
                self.record(
                    JournalEvent::Skipped,
                    Some((id, &description)),
                    Some(&reason),
                );
                report.skipped.push(format!("{description} ({reason})"));
            }
            Err(err) => {
                error!(item = %description, "restore failed: {err:#}");
                self.record(
                    JournalEvent::Failed,
                    Some((id, &description)),
                    Some(&format!("{err:#}")),
                );
                report.record_failure(description, &err);
            }
        }
    }

    fn record(&mut self, event: JournalEvent, item: Option<(ItemId, &str)>, detail: Option<&str>) {
        let Some(journal) = self.journal.as_mut() else {
            return;
        };
        let item = item.map(|(id, description)| (id.value(), description));
        if let Err(err) = journal.append(event, item, detail) {
            warn!("failed to write ledger journal: {err:#}");
        }
    }
}
