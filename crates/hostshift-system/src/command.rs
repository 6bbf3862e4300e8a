#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs an external program to completion and captures its output.
///
/// A non-zero exit is not an error at this level; callers decide what a
/// failing command means. `Err` is reserved for programs that could not be
/// started at all.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!(program, args = %args.join(" "), "running command");
        let mut command = Command::new(program);
        command.args(args).env("LC_ALL", "C");
        // Children get their own process group, so a terminal interrupt
        // reaches only hostshift and never a running transaction.
        #[cfg(unix)]
        command.process_group(0);
        let output = command
            .output()
            .with_context(|| format!("failed to start {program}"))?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Runs a command and turns a non-zero exit into an error carrying its output.
pub fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
    context_message: &str,
) -> Result<CommandOutput> {
    let output = runner.run(program, args)?;
    if output.success() {
        return Ok(output);
    }

    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output
            .code
            .map_or_else(|| "signal".to_string(), |code| code.to_string()),
        output.stdout.trim(),
        output.stderr.trim()
    ))
}

pub(crate) fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}
