use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use hostshift_core::{Credentials, Nevra};

/// Package database operations the ledger needs. Implementations run blocking
/// commands to completion; none of them may be called concurrently.
pub trait PackageManager {
    /// Installed packages whose name matches a shell-style `pattern`.
    fn list_installed(&self, pattern: &str) -> Result<Vec<Nevra>>;

    /// Removes packages without dependency checks and returns the ones that
    /// are actually gone afterwards. Packages that could not be removed are
    /// left out of the result rather than reported as an error.
    fn remove(&mut self, packages: &[Nevra]) -> Result<Vec<Nevra>>;

    /// Installs packages, given by name or full NEVRA, from the currently
    /// enabled repositories and returns the NEVRAs installed for them.
    fn install(&mut self, specs: &[String]) -> Result<Vec<Nevra>>;

    /// Downloads package files from the currently enabled repositories into
    /// `dest` so they can be reinstalled after their repositories are gone.
    fn download(&mut self, packages: &[Nevra], dest: &Path) -> Result<BTreeMap<Nevra, PathBuf>>;

    /// Installs local package files.
    fn install_local(&mut self, files: &[PathBuf]) -> Result<()>;

    /// Imports a GPG key into the package database and returns the
    /// `gpg-pubkey` pseudo-package that now represents it, or `None` when the
    /// key was already present.
    fn import_key(&mut self, key: &Path) -> Result<Option<Nevra>>;

    fn clean_metadata(&mut self) -> Result<()>;

    /// Resolves the pending distribution sync without committing it.
    fn validate_transaction(&mut self) -> Result<bool>;
}

pub trait SubscriptionClient {
    fn is_registered(&self) -> Result<bool>;
    fn register(&mut self, credentials: &Credentials) -> Result<()>;
    fn unregister(&mut self) -> Result<()>;
    /// Reloads entitlement data so newly installed product certificates are
    /// picked up.
    fn refresh(&mut self) -> Result<()>;
    fn enabled_repo_ids(&self) -> Result<Vec<String>>;
    /// Makes exactly `repo_ids` enabled, disabling every other repository.
    fn set_enabled_repos(&mut self, repo_ids: &[String]) -> Result<()>;
}

/// Borrowed access to the collaborators, handed to items while they enable
/// and restore.
pub struct HostServices<'a> {
    pub packages: &'a mut dyn PackageManager,
    pub subscription: &'a mut dyn SubscriptionClient,
}

impl<'a> HostServices<'a> {
    pub fn new(
        packages: &'a mut dyn PackageManager,
        subscription: &'a mut dyn SubscriptionClient,
    ) -> Self {
        Self {
            packages,
            subscription,
        }
    }
}
