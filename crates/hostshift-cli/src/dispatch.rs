use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

use anyhow::{anyhow, Context, Result};
use hostshift_backup::{
    current_unix_timestamp, new_run_id, read_journal_records, BackupController, BackupLayout,
    LedgerJournal,
};
use hostshift_core::ConversionProfile;
use hostshift_system::{RpmPackageManager, SubscriptionManagerClient, SystemCommandRunner};
use tracing::{error, info};

use crate::config::{load_tool_options, ToolOptions};
use crate::conversion::{run_conversion, ConversionContext};
use crate::interrupt::install_signal_handlers;
use crate::logging::{init_logging, LOG_DIR};
use crate::outcome::{format_journal_record, ConversionExit};
use crate::render::TerminalRenderer;
use crate::{Cli, Commands, ConvertArgs, JournalArgs};

pub fn run_cli(cli: Cli) -> ExitCode {
    match cli.command {
        Commands::Convert(args) => run_convert_command(&args, cli.debug).into(),
        Commands::Journal(args) => match run_journal_command(&args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error: {err:#}");
                ConversionExit::UsageError.into()
            }
        },
    }
}

struct ConversionSetup {
    options: ToolOptions,
    layout: BackupLayout,
    journal: LedgerJournal,
    interrupt: &'static AtomicBool,
}

fn run_convert_command(args: &ConvertArgs, debug: bool) -> ConversionExit {
    let renderer = TerminalRenderer::current();
    let setup = match setup_conversion(args, debug) {
        Ok(setup) => setup,
        Err(err) => {
            error!("{err:#}");
            renderer.print_status("error", &format!("{err:#}"));
            return ConversionExit::UsageError;
        }
    };

    let ConversionSetup {
        options,
        layout,
        journal,
        interrupt,
    } = setup;
    let mut packages = RpmPackageManager::new(
        SystemCommandRunner,
        options.profile.package_manager,
        options.profile.releasever.clone(),
    );
    if options.no_rhsm {
        packages = packages.with_enabled_repos(options.target_repoids.clone());
    }
    let mut subscription = SubscriptionManagerClient::new(SystemCommandRunner);
    let mut ctx = ConversionContext::new(
        options,
        layout,
        BackupController::with_journal(journal),
        &mut packages,
        &mut subscription,
        renderer,
        interrupt,
    );
    let exit = run_conversion(&mut ctx);
    info!(code = exit.code(), "hostshift finished");
    exit
}

/// Everything that can fail before the first change to the host.
fn setup_conversion(args: &ConvertArgs, debug: bool) -> Result<ConversionSetup> {
    if !running_as_root() {
        return Err(anyhow!("hostshift must be run as root"));
    }

    let started_at = current_unix_timestamp()?;
    let log_path = init_logging(Path::new(LOG_DIR), debug, started_at)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        log = %log_path.display(),
        "starting hostshift"
    );

    let options = load_tool_options(args)?;
    let interrupt = install_signal_handlers()?;
    let layout = BackupLayout::new(&options.backup_root);
    layout.ensure_base_dirs()?;
    let run_id = new_run_id(started_at);
    let journal = LedgerJournal::create(&layout, &run_id)?;
    info!(
        run_id = %run_id,
        profile = %options.profile.name,
        journal = %journal.path().display(),
        "conversion run prepared"
    );

    Ok(ConversionSetup {
        options,
        layout,
        journal,
        interrupt,
    })
}

fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

fn run_journal_command(args: &JournalArgs) -> Result<()> {
    let backup_root = match &args.backup_dir {
        Some(dir) => dir.clone(),
        None => ConversionProfile::builtin()?.backup_root,
    };
    let layout = BackupLayout::new(backup_root);
    let path = match &args.run_id {
        Some(run_id) => layout.journal_path(run_id),
        None => latest_journal(&layout)?.ok_or_else(|| {
            anyhow!(
                "no conversion journals found in {}",
                layout.journal_dir().display()
            )
        })?,
    };
    if !path.exists() {
        return Err(anyhow!("journal not found: {}", path.display()));
    }

    for record in read_journal_records(&path)? {
        if args.json {
            println!(
                "{}",
                serde_json::to_string(&record).context("failed to encode journal record")?
            );
        } else {
            println!("{}", format_journal_record(&record));
        }
    }
    Ok(())
}

/// Journal of the most recently started run, going by the timestamp in the
/// run id.
pub(crate) fn latest_journal(layout: &BackupLayout) -> Result<Option<PathBuf>> {
    let dir = layout.journal_dir();
    if !dir.exists() {
        return Ok(None);
    }

    let mut latest: Option<(u64, String, PathBuf)> = None;
    for entry in
        fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(run_id) = name.strip_suffix(".jsonl") else {
            continue;
        };
        let started_at = run_started_at(run_id).unwrap_or(0);
        let candidate = (started_at, name.clone(), entry.path());
        if latest
            .as_ref()
            .map_or(true, |current| (candidate.0, &candidate.1) > (current.0, &current.1))
        {
            latest = Some(candidate);
        }
    }
    Ok(latest.map(|(_, _, path)| path))
}

fn run_started_at(run_id: &str) -> Option<u64> {
    run_id
        .strip_prefix("run-")?
        .split('-')
        .next()?
        .parse()
        .ok()
}
