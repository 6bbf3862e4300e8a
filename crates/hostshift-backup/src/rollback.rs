use anyhow::Result;
use tracing::{error, info, warn};

use crate::controller::{BackupController, RollbackReport};
use crate::host::HostServices;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Every restoration succeeded or had nothing to do.
    RolledBack(RollbackReport),
    /// At least one restoration failed; the host is partially converted.
    ManualInterventionRequired(RollbackReport),
}

impl RollbackOutcome {
    pub fn report(&self) -> &RollbackReport {
        match self {
            Self::RolledBack(report) | Self::ManualInterventionRequired(report) => report,
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, Self::RolledBack(_))
    }
}

type LegacyCleanup<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

/// Drains a ledger after a fatal error or an interrupt.
///
/// Order: items above the earliest partition (all items when there is none),
/// then the legacy cleanup hook, then whatever is left. Nothing in the drain
/// stops it early.
pub struct RollbackExecutor<'a> {
    ledger: &'a mut BackupController,
    legacy: Option<(String, LegacyCleanup<'a>)>,
}

impl<'a> RollbackExecutor<'a> {
    pub fn new(ledger: &'a mut BackupController) -> Self {
        Self {
            ledger,
            legacy: None,
        }
    }

    /// Cleanup for changes that are not tracked by the ledger. Runs between
    /// the partitioned drain and the rest of the ledger.
    pub fn with_legacy_cleanup<F>(mut self, label: impl Into<String>, cleanup: F) -> Self
    where
        F: FnOnce() -> Result<()> + 'a,
    {
        self.legacy = Some((label.into(), Box::new(cleanup)));
        self
    }

    pub fn run(self, host: &mut HostServices<'_>) -> RollbackOutcome {
        let Self { ledger, legacy } = self;
        ledger.freeze();
        info!(items = ledger.len(), "starting rollback");

        let mut report = match ledger.earliest_partition() {
            Some(partition) => match ledger.pop_to_partition(partition, host) {
                Ok(report) => report,
                Err(err) => {
                    // Unreachable: the partition was just read from this ledger.
                    error!("partitioned rollback failed: {err:#}");
                    let mut report = RollbackReport::default();
                    report.record_failure("partitioned rollback", &err);
                    report
                }
            },
            None => ledger.pop_all(host),
        };

        if let Some((label, cleanup)) = legacy {
            info!(step = %label, "running legacy cleanup");
            match cleanup() {
                Ok(()) => report.restored.push(label),
                Err(err) => {
                    error!(step = %label, "legacy cleanup failed: {err:#}");
                    report.record_failure(label, &err);
                }
            }
        }

        report.merge(ledger.pop_all(host));

        if report.is_clean() {
            info!(attempted = report.attempted(), "rollback complete");
            RollbackOutcome::RolledBack(report)
        } else {
            warn!(
                failed = report.failures.len(),
                attempted = report.attempted(),
                "rollback incomplete; manual intervention required"
            );
            RollbackOutcome::ManualInterventionRequired(report)
        }
    }
}
