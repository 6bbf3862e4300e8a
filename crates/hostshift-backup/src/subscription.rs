use anyhow::{Context, Result};
use hostshift_core::Credentials;
use tracing::{info, warn};

use crate::host::HostServices;
use crate::item::RestoreOutcome;

/// Registration of the host with the entitlement service.
///
/// Hosts that were registered before the run keep their registration; only a
/// registration made by this run is undone.
#[derive(Debug, Clone)]
pub struct SubscriptionBackup {
    credentials: Credentials,
    registered_before: Option<bool>,
}

impl SubscriptionBackup {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            registered_before: None,
        }
    }

    pub fn registered_before(&self) -> Option<bool> {
        self.registered_before
    }

    pub(crate) fn describe(&self) -> String {
        format!(
            "subscription registration ({})",
            self.credentials.method()
        )
    }

    pub(crate) fn enable(&mut self, host: &mut HostServices<'_>) -> Result<()> {
        let registered = host
            .subscription
            .is_registered()
            .context("failed to query registration status")?;
        self.registered_before = Some(registered);

        if registered {
            info!("host is already registered; keeping the existing registration");
            return Ok(());
        }

        host.subscription
            .register(&self.credentials)
            .context("failed to register the host with the entitlement service")?;
        info!(method = self.credentials.method(), "registered host");
        Ok(())
    }

    pub(crate) fn restore(&mut self, host: &mut HostServices<'_>) -> Result<RestoreOutcome> {
        match self.registered_before {
            Some(false) => {}
            Some(true) => {
                let reason = "host was registered before the run".to_string();
                info!("{reason}; leaving registration in place");
                return Ok(RestoreOutcome::Skipped(reason));
            }
            None => {
                let reason = "registration state was never recorded".to_string();
                warn!("{reason}; leaving registration in place");
                return Ok(RestoreOutcome::Skipped(reason));
            }
        }

        host.subscription
            .unregister()
            .context("failed to unregister the host")?;
        info!("unregistered host");
        Ok(RestoreOutcome::Restored)
    }
}
