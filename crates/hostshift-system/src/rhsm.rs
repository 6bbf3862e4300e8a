use anyhow::{anyhow, Result};
use hostshift_backup::SubscriptionClient;
use hostshift_core::Credentials;
use tracing::{debug, info};

use crate::command::{args, run_checked, CommandRunner};

const SUBSCRIPTION_MANAGER: &str = "subscription-manager";

/// Entitlement client driving the `subscription-manager` command line tool.
pub struct SubscriptionManagerClient<R> {
    runner: R,
}

impl<R: CommandRunner> SubscriptionManagerClient<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }
}

impl<R: CommandRunner> SubscriptionClient for SubscriptionManagerClient<R> {
    fn is_registered(&self) -> Result<bool> {
        let output = self.runner.run(SUBSCRIPTION_MANAGER, &args(["identity"]))?;
        debug!(code = ?output.code, "queried registration identity");
        Ok(output.success())
    }

    fn register(&mut self, credentials: &Credentials) -> Result<()> {
        let mut command_args = args(["register"]);
        match credentials {
            Credentials::Password { username, password } => {
                command_args.push(format!("--username={username}"));
                command_args.push(format!("--password={password}"));
            }
            Credentials::ActivationKey { org, key } => {
                command_args.push(format!("--org={org}"));
                command_args.push(format!("--activationkey={key}"));
            }
        }

        // The command line carries secrets; keep it out of error messages.
        let output = self.runner.run(SUBSCRIPTION_MANAGER, &command_args)?;
        if !output.success() {
            return Err(anyhow!(
                "registration with {} failed: {}",
                credentials.method(),
                output.stderr.trim()
            ));
        }
        info!(method = credentials.method(), "system registered");
        Ok(())
    }

    fn unregister(&mut self) -> Result<()> {
        run_checked(
            &self.runner,
            SUBSCRIPTION_MANAGER,
            &args(["unregister"]),
            "failed to unregister the system",
        )?;
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        run_checked(
            &self.runner,
            SUBSCRIPTION_MANAGER,
            &args(["refresh"]),
            "failed to refresh subscription information",
        )?;
        Ok(())
    }

    fn enabled_repo_ids(&self) -> Result<Vec<String>> {
        let output = run_checked(
            &self.runner,
            SUBSCRIPTION_MANAGER,
            &args(["repos", "--list-enabled"]),
            "failed to list enabled repositories",
        )?;
        Ok(parse_repo_ids(&output.stdout))
    }

    fn set_enabled_repos(&mut self, repo_ids: &[String]) -> Result<()> {
        let mut command_args = args(["repos", "--disable=*"]);
        command_args.extend(repo_ids.iter().map(|id| format!("--enable={id}")));
        run_checked(
            &self.runner,
            SUBSCRIPTION_MANAGER,
            &command_args,
            "failed to change enabled repositories",
        )?;
        Ok(())
    }
}

/// Extracts the `Repo ID:` values from `subscription-manager repos` output.
pub fn parse_repo_ids(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Repo ID:"))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
