use anyhow::{Context, Result};
use tracing::info;

use crate::host::HostServices;
use crate::item::RestoreOutcome;

/// Which repositories the subscription client had enabled before the target
/// set replaced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoEnablementBackup {
    target: Vec<String>,
    original: Option<Vec<String>>,
}

impl RepoEnablementBackup {
    pub fn new(target: Vec<String>) -> Self {
        Self {
            target,
            original: None,
        }
    }

    pub fn original(&self) -> Option<&[String]> {
        self.original.as_deref()
    }

    pub(crate) fn describe(&self) -> String {
        format!("repository enablement ({})", self.target.join(", "))
    }

    pub(crate) fn enable(&mut self, host: &mut HostServices<'_>) -> Result<()> {
        let original = host
            .subscription
            .enabled_repo_ids()
            .context("failed to list enabled repositories")?;
        host.subscription
            .set_enabled_repos(&self.target)
            .with_context(|| format!("failed to enable {}", self.target.join(", ")))?;
        info!(
            previous = %original.join(", "),
            enabled = %self.target.join(", "),
            "switched enabled repositories"
        );
        self.original = Some(original);
        Ok(())
    }

    pub(crate) fn restore(&mut self, host: &mut HostServices<'_>) -> Result<RestoreOutcome> {
        let original = self.original.clone().unwrap_or_default();
        host.subscription
            .set_enabled_repos(&original)
            .context("failed to re-apply the original repository enablement")?;
        info!(enabled = %original.join(", "), "restored repository enablement");
        Ok(RestoreOutcome::Restored)
    }
}
