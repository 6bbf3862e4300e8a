use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use hostshift_core::Nevra;
use tracing::{info, warn};

use crate::host::HostServices;
use crate::item::RestoreOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageChangeKind {
    Removal,
    Installation,
}

impl PackageChangeKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Removal => "removed",
            Self::Installation => "installed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PackagePlan {
    Removal {
        packages: Vec<Nevra>,
        cache_dir: PathBuf,
    },
    Installation {
        specs: Vec<String>,
    },
}

/// Packages removed from or installed on the host.
///
/// A removal first downloads the packages from the original distribution's
/// repositories into its cache directory, because those repositories may be
/// gone by the time the removal has to be undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageBackup {
    plan: PackagePlan,
    applied: Vec<Nevra>,
    cached_files: BTreeMap<Nevra, PathBuf>,
}

impl PackageBackup {
    pub fn removal(packages: Vec<Nevra>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            plan: PackagePlan::Removal {
                packages,
                cache_dir: cache_dir.into(),
            },
            applied: Vec::new(),
            cached_files: BTreeMap::new(),
        }
    }

    /// Package files already fetched into the cache. `enable` downloads only
    /// the packages missing from this map.
    pub fn with_cached_files(mut self, files: BTreeMap<Nevra, PathBuf>) -> Self {
        self.cached_files.extend(files);
        self
    }

    /// Installation of packages given by name or full NEVRA.
    pub fn installation<S: Into<String>>(specs: impl IntoIterator<Item = S>) -> Self {
        Self {
            plan: PackagePlan::Installation {
                specs: specs.into_iter().map(Into::into).collect(),
            },
            applied: Vec::new(),
            cached_files: BTreeMap::new(),
        }
    }

    /// Packages installed by some other means before the item was created,
    /// for use with [`crate::RestorableItem::recorded`].
    pub fn installed(packages: Vec<Nevra>) -> Self {
        Self {
            applied: packages.clone(),
            ..Self::installation(packages.iter().map(ToString::to_string))
        }
    }

    pub fn kind(&self) -> PackageChangeKind {
        match self.plan {
            PackagePlan::Removal { .. } => PackageChangeKind::Removal,
            PackagePlan::Installation { .. } => PackageChangeKind::Installation,
        }
    }

    pub fn requested(&self) -> Vec<String> {
        match &self.plan {
            PackagePlan::Removal { packages, .. } => {
                packages.iter().map(ToString::to_string).collect()
            }
            PackagePlan::Installation { specs } => specs.clone(),
        }
    }

    /// What `enable` actually changed. For a removal this can be a subset of
    /// the requested packages.
    pub fn applied(&self) -> &[Nevra] {
        &self.applied
    }

    /// Requested removals that were still installed after `enable`.
    pub fn not_removed(&self) -> Vec<Nevra> {
        match &self.plan {
            PackagePlan::Removal { packages, .. } => packages
                .iter()
                .filter(|nevra| !self.applied.contains(nevra))
                .cloned()
                .collect(),
            PackagePlan::Installation { .. } => Vec::new(),
        }
    }

    pub(crate) fn describe(&self) -> String {
        let packages = if self.applied.is_empty() {
            self.requested().join(", ")
        } else {
            join_nevras(&self.applied)
        };
        format!("packages {}: {packages}", self.kind().as_str())
    }

    pub(crate) fn enable(&mut self, host: &mut HostServices<'_>) -> Result<()> {
        match &self.plan {
            PackagePlan::Removal { packages, .. } if packages.is_empty() => Ok(()),
            PackagePlan::Installation { specs } if specs.is_empty() => Ok(()),
            PackagePlan::Removal {
                packages,
                cache_dir,
            } => {
                let pending = packages
                    .iter()
                    .filter(|nevra| !self.cached_files.contains_key(nevra))
                    .cloned()
                    .collect::<Vec<_>>();
                if !pending.is_empty() {
                    let downloaded =
                        host.packages.download(&pending, cache_dir).with_context(|| {
                            format!(
                                "failed to download packages before removal: {}",
                                join_nevras(&pending)
                            )
                        })?;
                    self.cached_files.extend(downloaded);
                }
                let missing = packages
                    .iter()
                    .filter(|nevra| !self.cached_files.contains_key(nevra))
                    .cloned()
                    .collect::<Vec<_>>();
                if !missing.is_empty() {
                    warn!(
                        packages = %join_nevras(&missing),
                        "could not download packages; they would have to be reinstalled from repositories"
                    );
                }

                self.applied = host.packages.remove(packages)?;
                Ok(())
            }
            PackagePlan::Installation { specs } => {
                let installed = host
                    .packages
                    .install(specs)
                    .with_context(|| format!("failed to install {}", specs.join(", ")))?;
                self.applied = installed;
                Ok(())
            }
        }
    }

    pub(crate) fn restore(&mut self, host: &mut HostServices<'_>) -> Result<RestoreOutcome> {
        if self.applied.is_empty() {
            let reason = format!("no packages were {}", self.kind().as_str());
            warn!("{reason}; nothing to restore");
            return Ok(RestoreOutcome::Skipped(reason));
        }

        match self.kind() {
            PackageChangeKind::Removal => self.reinstall_removed(host),
            PackageChangeKind::Installation => self.remove_installed(host),
        }
    }

    fn reinstall_removed(&self, host: &mut HostServices<'_>) -> Result<RestoreOutcome> {
        let mut files = Vec::new();
        let mut uncached = Vec::new();
        for nevra in &self.applied {
            match self.cached_files.get(nevra) {
                Some(path) => files.push(path.clone()),
                None => uncached.push(nevra.to_string()),
            }
        }

        if !files.is_empty() {
            host.packages
                .install_local(&files)
                .context("failed to reinstall removed packages from the backup cache")?;
        }
        if !uncached.is_empty() {
            warn!(
                packages = %uncached.join(", "),
                "reinstalling packages without a cached copy from enabled repositories"
            );
            host.packages
                .install(&uncached)
                .with_context(|| format!("failed to reinstall {}", uncached.join(", ")))?;
        }

        info!(packages = %join_nevras(&self.applied), "reinstalled removed packages");
        Ok(RestoreOutcome::Restored)
    }

    fn remove_installed(&self, host: &mut HostServices<'_>) -> Result<RestoreOutcome> {
        let removed = host.packages.remove(&self.applied)?;
        let left_behind = self
            .applied
            .iter()
            .filter(|nevra| !removed.contains(nevra))
            .cloned()
            .collect::<Vec<_>>();
        if !left_behind.is_empty() {
            return Err(anyhow!(
                "packages installed during the run are still present: {}",
                join_nevras(&left_behind)
            ));
        }

        info!(packages = %join_nevras(&self.applied), "removed packages installed during the run");
        Ok(RestoreOutcome::Restored)
    }
}

pub(crate) fn join_nevras(nevras: &[Nevra]) -> String {
    nevras
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
