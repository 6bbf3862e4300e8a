use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

mod config;
mod conversion;
mod dispatch;
mod interrupt;
mod logging;
mod outcome;
mod render;

use dispatch::run_cli;

#[derive(Parser, Debug)]
#[command(name = "hostshift")]
#[command(about = "In-place conversion of a running host to a compatible enterprise distribution", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level.
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert this host, rolling back every change if any step fails.
    Convert(ConvertArgs),
    /// Print the ledger journal of a conversion run.
    Journal(JournalArgs),
}

#[derive(Args, Debug, Default, Clone)]
struct ConvertArgs {
    #[arg(long, short = 'u')]
    username: Option<String>,
    #[arg(long, short = 'p')]
    password: Option<String>,
    #[arg(long, short = 'k')]
    activation_key: Option<String>,
    #[arg(long, short = 'o')]
    org: Option<String>,
    /// Do not install or use the subscription tooling.
    #[arg(long)]
    no_rhsm: bool,
    /// Repository to enable instead of the profile's target repositories.
    #[arg(long = "enable-repo", value_name = "REPOID")]
    enable_repo: Vec<String>,
    /// Conversion profile (TOML). Defaults to the built-in EL7 profile.
    #[arg(long)]
    profile: Option<PathBuf>,
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
    #[arg(long)]
    backup_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct JournalArgs {
    /// Run to print; the most recent run when omitted.
    run_id: Option<String>,
    #[arg(long)]
    backup_dir: Option<PathBuf>,
    /// Print raw JSON records.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    run_cli(cli)
}

#[cfg(test)]
mod tests;
