use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use tracing::{debug, warn};

use crate::error::ProgramLogicError;
use crate::file::FileBackup;
use crate::host::HostServices;
use crate::packages::PackageBackup;
use crate::repos::RepoEnablementBackup;
use crate::subscription::SubscriptionBackup;

static NEXT_ITEM_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one restorable change. Clones share it, which is how the ledger
/// recognizes the same change being pushed twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(u64);

impl ItemId {
    fn next() -> Self {
        Self(NEXT_ITEM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    Skipped(String),
}

#[derive(Debug, Clone)]
pub enum RestorableChange {
    File(FileBackup),
    Packages(PackageBackup),
    Subscription(SubscriptionBackup),
    RepoEnablement(RepoEnablementBackup),
}

impl RestorableChange {
    fn describe(&self) -> String {
        match self {
            Self::File(backup) => backup.describe(),
            Self::Packages(backup) => backup.describe(),
            Self::Subscription(backup) => backup.describe(),
            Self::RepoEnablement(backup) => backup.describe(),
        }
    }
}

/// A change to the host that can be undone.
///
/// `enable` runs at most once and does whatever capture (and, for some
/// variants, the mutation itself) the change needs. `restore` undoes it and
/// is idempotent: only the first call does any work.
#[derive(Debug, Clone)]
pub struct RestorableItem {
    id: ItemId,
    enabled: bool,
    restore_called: bool,
    change: RestorableChange,
}

impl RestorableItem {
    pub fn new(change: RestorableChange) -> Self {
        Self {
            id: ItemId::next(),
            enabled: false,
            restore_called: false,
            change,
        }
    }

    /// Wraps a change whose mutation already happened outside the item, so
    /// there is nothing left for `enable` to do.
    pub fn recorded(change: RestorableChange) -> Self {
        Self {
            enabled: true,
            ..Self::new(change)
        }
    }

    pub fn file(backup: FileBackup) -> Self {
        Self::new(RestorableChange::File(backup))
    }

    pub fn packages(backup: PackageBackup) -> Self {
        Self::new(RestorableChange::Packages(backup))
    }

    pub fn subscription(backup: SubscriptionBackup) -> Self {
        Self::new(RestorableChange::Subscription(backup))
    }

    pub fn repo_enablement(backup: RepoEnablementBackup) -> Self {
        Self::new(RestorableChange::RepoEnablement(backup))
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn restore_called(&self) -> bool {
        self.restore_called
    }

    pub fn change(&self) -> &RestorableChange {
        &self.change
    }

    pub fn describe(&self) -> String {
        self.change.describe()
    }

    pub fn enable(&mut self, host: &mut HostServices<'_>) -> Result<()> {
        if self.enabled {
            return Err(ProgramLogicError::new(format!(
                "{} was already enabled",
                self.describe()
            ))
            .into());
        }

        match &mut self.change {
            RestorableChange::File(backup) => backup.enable()?,
            RestorableChange::Packages(backup) => backup.enable(host)?,
            RestorableChange::Subscription(backup) => backup.enable(host)?,
            RestorableChange::RepoEnablement(backup) => backup.enable(host)?,
        }
        self.enabled = true;
        debug!(item = %self.describe(), "enabled restorable item");
        Ok(())
    }

    pub fn restore(&mut self, host: &mut HostServices<'_>) -> Result<RestoreOutcome> {
        if self.restore_called {
            debug!(item = %self.describe(), "restore already ran; ignoring");
            return Ok(RestoreOutcome::Skipped("already restored".to_string()));
        }
        self.restore_called = true;

        if !self.enabled {
            let reason = "change was never applied".to_string();
            warn!(item = %self.describe(), "{reason}; nothing to restore");
            return Ok(RestoreOutcome::Skipped(reason));
        }

        match &mut self.change {
            RestorableChange::File(backup) => backup.restore(),
            RestorableChange::Packages(backup) => backup.restore(host),
            RestorableChange::Subscription(backup) => backup.restore(host),
            RestorableChange::RepoEnablement(backup) => backup.restore(host),
        }
    }
}
