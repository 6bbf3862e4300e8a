use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{anyhow, Context, Result};
use hostshift_backup::{
    is_program_logic_error, BackupController, BackupLayout, FileBackup, HostServices, ItemId,
    PackageBackup, PackageManager, ProgramLogicError, RepoEnablementBackup, RestorableChange,
    RestorableItem, RollbackExecutor, RollbackOutcome, SubscriptionBackup, SubscriptionClient,
};
use hostshift_core::{CertificateSpec, Nevra};
use hostshift_system::{clear_versionlock, RepositorySnapshot, SystemInfo, OS_RELEASE_PATH};
use tracing::{error, info, warn};

use crate::config::ToolOptions;
use crate::interrupt::{check_interrupt, is_aborted};
use crate::outcome::{rollback_summary_lines, ConversionExit};
use crate::render::TerminalRenderer;

/// State shared by every conversion step: the backup ledger, the host
/// collaborators and the resolved options.
pub struct ConversionContext<'a> {
    pub ledger: BackupController,
    pub packages: &'a mut dyn PackageManager,
    pub subscription: &'a mut dyn SubscriptionClient,
    pub options: ToolOptions,
    pub layout: BackupLayout,
    pub renderer: TerminalRenderer,
    pub repo_snapshot: Option<RepositorySnapshot>,
    pub system_info: Option<SystemInfo>,
    /// Original branding packages fetched while the original repositories
    /// were still configured.
    pub branding_cache: BTreeMap<Nevra, PathBuf>,
    interrupt: &'a AtomicBool,
    os_release: PathBuf,
}

impl<'a> ConversionContext<'a> {
    pub fn new(
        options: ToolOptions,
        layout: BackupLayout,
        ledger: BackupController,
        packages: &'a mut dyn PackageManager,
        subscription: &'a mut dyn SubscriptionClient,
        renderer: TerminalRenderer,
        interrupt: &'a AtomicBool,
    ) -> Self {
        Self {
            ledger,
            packages,
            subscription,
            options,
            layout,
            renderer,
            repo_snapshot: None,
            system_info: None,
            branding_cache: BTreeMap::new(),
            interrupt,
            os_release: PathBuf::from(OS_RELEASE_PATH),
        }
    }

    pub fn with_os_release(mut self, path: impl Into<PathBuf>) -> Self {
        self.os_release = path.into();
        self
    }

    fn push(&mut self, item: RestorableItem) -> Result<ItemId> {
        let mut host = HostServices::new(&mut *self.packages, &mut *self.subscription);
        self.ledger.push(item, &mut host)
    }

    fn enable(&mut self, item: &mut RestorableItem) -> Result<()> {
        let mut host = HostServices::new(&mut *self.packages, &mut *self.subscription);
        item.enable(&mut host)
    }
}

type StepFn = fn(&mut ConversionContext<'_>) -> Result<()>;

struct ConversionStep {
    title: &'static str,
    run: StepFn,
}

const CONVERSION_STEPS: &[ConversionStep] = &[
    ConversionStep {
        title: "Prepare package manager",
        run: prepare_package_manager,
    },
    ConversionStep {
        title: "Collect system information",
        run: gather_system_info,
    },
    ConversionStep {
        title: "Back up repository files",
        run: backup_repository_files,
    },
    ConversionStep {
        title: "Cache original branding packages",
        run: cache_branding_packages,
    },
    ConversionStep {
        title: "Remove excluded packages",
        run: remove_excluded_packages,
    },
    ConversionStep {
        title: "Install trust material",
        run: install_trust_material,
    },
    ConversionStep {
        title: "Install subscription tooling",
        run: install_subscription_tooling,
    },
    ConversionStep {
        title: "Remove repository packages",
        run: remove_repofile_packages,
    },
    ConversionStep {
        title: "Subscribe and enable repositories",
        run: subscribe_and_enable_repos,
    },
    ConversionStep {
        title: "Replace branding packages",
        run: swap_branding_packages,
    },
    ConversionStep {
        title: "Validate final transaction",
        run: validate_final_transaction,
    },
];

/// Runs every step in order. The first error stops the sequence; pending
/// interrupts are turned into an error at each step boundary.
pub fn convert(ctx: &mut ConversionContext<'_>) -> Result<()> {
    for step in CONVERSION_STEPS {
        check_interrupt(ctx.interrupt)?;
        ctx.renderer.print_section(step.title);
        info!(step = step.title, "starting step");
        (step.run)(ctx).with_context(|| format!("step '{}' failed", step.title))?;
    }
    check_interrupt(ctx.interrupt)
}

/// Converts the host, or rolls every recorded change back if that fails.
pub fn run_conversion(ctx: &mut ConversionContext<'_>) -> ConversionExit {
    let err = match convert(ctx) {
        Ok(()) => {
            std::mem::take(&mut ctx.ledger).commit();
            ctx.renderer
                .print_status("ok", "Conversion complete. Reboot to start the converted system.");
            return ConversionExit::Converted;
        }
        Err(err) => err,
    };

    let internal_error = is_program_logic_error(&err);
    if is_aborted(&err) {
        warn!("{err:#}");
        ctx.renderer
            .print_status("warn", "Conversion interrupted; rolling back all changes.");
    } else {
        error!("conversion failed: {err:#}");
        ctx.renderer
            .print_status("error", &format!("Conversion failed: {err:#}"));
    }

    let outcome = roll_back(ctx);
    let status = if outcome.is_clean() { "ok" } else { "error" };
    for line in rollback_summary_lines(&outcome, internal_error) {
        ctx.renderer.print_status(status, &line);
    }
    ConversionExit::from_rollback(&outcome)
}

/// Drains the ledger. The repository file snapshot is restored between the
/// partitioned items and the rest.
pub fn roll_back(ctx: &mut ConversionContext<'_>) -> RollbackOutcome {
    ctx.renderer.print_section("Rollback");
    let snapshot = ctx.repo_snapshot.take();
    let spinner = ctx.renderer.start_spinner("rolling back changes");

    let mut host = HostServices::new(&mut *ctx.packages, &mut *ctx.subscription);
    let mut executor = RollbackExecutor::new(&mut ctx.ledger);
    if let Some(snapshot) = snapshot {
        executor = executor
            .with_legacy_cleanup("repository files", move || snapshot.restore().map(|_| ()));
    }
    let outcome = executor.run(&mut host);

    if outcome.is_clean() {
        spinner.finish();
    } else {
        spinner.abandon();
    }
    outcome
}

fn with_spinner<T>(
    renderer: TerminalRenderer,
    label: &str,
    work: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let spinner = renderer.start_spinner(label);
    let result = work();
    match &result {
        Ok(_) => spinner.finish(),
        Err(_) => spinner.abandon(),
    }
    result
}

pub(crate) fn prepare_package_manager(ctx: &mut ConversionContext<'_>) -> Result<()> {
    let versionlock = ctx.options.profile.versionlock_file.clone();
    if versionlock.exists() {
        let backup = RestorableItem::file(FileBackup::new(&ctx.layout, &versionlock));
        ctx.push(backup)?;
        if clear_versionlock(&versionlock)? {
            ctx.renderer.print_status(
                "ok",
                &format!("Cleared version locks in {}", versionlock.display()),
            );
        } else {
            ctx.renderer.print_status("ok", "No version locks to clear");
        }
    } else {
        info!(path = %versionlock.display(), "no versionlock list present");
    }

    let renderer = ctx.renderer;
    if let Err(err) = with_spinner(renderer, "cleaning package metadata", || {
        ctx.packages.clean_metadata()
    }) {
        warn!("failed to clean package metadata: {err:#}");
        ctx.renderer
            .print_status("warn", "Could not clean cached package metadata");
    }
    Ok(())
}

pub(crate) fn gather_system_info(ctx: &mut ConversionContext<'_>) -> Result<()> {
    let info = SystemInfo::detect(&ctx.os_release)?;
    info!(
        id = %info.id,
        version = %info.version_id,
        arch = %info.arch,
        "detected system"
    );
    ctx.renderer.print_status(
        "ok",
        &format!("Detected {} ({})", info.pretty_name, info.arch),
    );
    ctx.system_info = Some(info);
    Ok(())
}

pub(crate) fn backup_repository_files(ctx: &mut ConversionContext<'_>) -> Result<()> {
    let profile = &ctx.options.profile;
    let snapshot = RepositorySnapshot::capture(&ctx.layout, &profile.repo_dir, &profile.vars_dir)?;
    ctx.renderer.print_status(
        "ok",
        &format!("Backed up {} repository file(s)", snapshot.len()),
    );
    ctx.repo_snapshot = Some(snapshot);
    Ok(())
}

/// Downloads the branding packages that will be swapped out later, while the
/// repositories they came from are still reachable.
pub(crate) fn cache_branding_packages(ctx: &mut ConversionContext<'_>) -> Result<()> {
    let swaps = ctx.options.profile.branding_swaps.clone();
    let cache_dir = ctx.layout.packages_dir();
    for swap in swaps {
        let installed = ctx.packages.list_installed(&swap.from)?;
        if installed.is_empty() {
            continue;
        }

        let renderer = ctx.renderer;
        match with_spinner(renderer, "downloading branding packages", || {
            ctx.packages.download(&installed, &cache_dir)
        }) {
            Ok(files) => {
                info!(package = %swap.from, cached = files.len(), "cached branding packages");
                ctx.branding_cache.extend(files);
            }
            Err(err) => {
                warn!(package = %swap.from, "failed to cache branding packages: {err:#}");
                ctx.renderer.print_status(
                    "warn",
                    &format!("Could not download {} for a later rollback", swap.from),
                );
            }
        }
    }
    Ok(())
}

pub(crate) fn remove_excluded_packages(ctx: &mut ConversionContext<'_>) -> Result<()> {
    let patterns = ctx.options.profile.excluded_pkgs.clone();
    remove_installed_packages(ctx, &patterns)
}

pub(crate) fn remove_repofile_packages(ctx: &mut ConversionContext<'_>) -> Result<()> {
    let patterns = ctx.options.profile.repofile_pkgs.clone();
    remove_installed_packages(ctx, &patterns)
}

/// Removes whatever matches `patterns`. A failing removal is reported and
/// ends the step without touching the ledger.
fn remove_installed_packages(ctx: &mut ConversionContext<'_>, patterns: &[String]) -> Result<()> {
    let mut found = BTreeSet::new();
    for pattern in patterns {
        found.extend(ctx.packages.list_installed(pattern)?);
    }
    if found.is_empty() {
        info!("no packages removed");
        ctx.renderer
            .print_status("ok", "None of the packages are installed; no packages removed");
        return Ok(());
    }

    let packages = found.into_iter().collect::<Vec<_>>();
    let mut item = RestorableItem::packages(PackageBackup::removal(
        packages,
        ctx.layout.packages_dir(),
    ));
    let renderer = ctx.renderer;
    if let Err(err) = with_spinner(renderer, "removing packages", || ctx.enable(&mut item)) {
        warn!("package removal failed: {err:#}");
        ctx.renderer
            .print_status("warn", &format!("Package removal failed: {err:#}"));
        return Ok(());
    }

    let (removed, not_removed) = match item.change() {
        RestorableChange::Packages(backup) => (backup.applied().to_vec(), backup.not_removed()),
        _ => {
            return Err(ProgramLogicError::new("package removal produced a non-package item").into())
        }
    };
    if !not_removed.is_empty() {
        let listed = join(&not_removed);
        warn!(packages = %listed, "packages were not removed");
        ctx.renderer.print_status(
            "warn",
            &format!("The following packages were not removed: {listed}"),
        );
    }
    if removed.is_empty() {
        info!("no packages removed");
        ctx.renderer.print_status("ok", "No packages removed");
        return Ok(());
    }

    ctx.renderer.print_status(
        "ok",
        &format!("The following packages were removed: {}", join(&removed)),
    );
    ctx.push(item)?;
    Ok(())
}

pub(crate) fn install_trust_material(ctx: &mut ConversionContext<'_>) -> Result<()> {
    let keys = ctx.options.profile.gpg_keys.clone();
    for key in &keys {
        let imported = ctx
            .packages
            .import_key(key)
            .with_context(|| format!("failed to import GPG key {}", key.display()))?;
        match imported {
            Some(nevra) => {
                let change = RestorableChange::Packages(PackageBackup::installed(vec![nevra]));
                ctx.push(RestorableItem::recorded(change))?;
                ctx.renderer
                    .print_status("ok", &format!("Imported GPG key {}", key.display()));
            }
            None => ctx.renderer.print_status(
                "ok",
                &format!("GPG key {} is already imported", key.display()),
            ),
        }
    }

    let cert = ctx.options.profile.cdn_ca_cert.clone();
    install_certificate(ctx, &cert)
}

pub(crate) fn install_subscription_tooling(ctx: &mut ConversionContext<'_>) -> Result<()> {
    if ctx.options.no_rhsm {
        ctx.renderer
            .print_status("warn", "Skipping subscription tooling (--no-rhsm)");
        return Ok(());
    }

    let mut missing = Vec::new();
    for name in &ctx.options.profile.subscription_pkgs {
        if ctx.packages.list_installed(name)?.is_empty() {
            missing.push(name.clone());
        }
    }

    if missing.is_empty() {
        ctx.renderer
            .print_status("ok", "Subscription tooling is already installed");
    } else {
        // Subscription tooling comes out again before the repository files
        // are restored.
        ctx.ledger.push_partition()?;
        let item = RestorableItem::packages(PackageBackup::installation(missing.clone()));
        let renderer = ctx.renderer;
        with_spinner(renderer, "installing subscription tooling", || ctx.push(item))?;
        ctx.renderer
            .print_status("ok", &format!("Installed {}", missing.join(", ")));
    }

    let cert = ctx.options.profile.product_cert.clone();
    install_certificate(ctx, &cert)
}

pub(crate) fn subscribe_and_enable_repos(ctx: &mut ConversionContext<'_>) -> Result<()> {
    if ctx.options.no_rhsm {
        ctx.renderer
            .print_status("warn", "Skipping registration (--no-rhsm)");
        return Ok(());
    }

    match ctx.options.credentials.clone() {
        Some(credentials) => {
            let method = credentials.method();
            let item = RestorableItem::subscription(SubscriptionBackup::new(credentials));
            let renderer = ctx.renderer;
            with_spinner(renderer, "registering the system", || ctx.push(item))?;
            ctx.renderer
                .print_status("ok", &format!("System registered using {method}"));
        }
        None => {
            if !ctx.subscription.is_registered()? {
                warn!("no registration credentials given and the system is not registered");
                ctx.renderer.print_status(
                    "warn",
                    "No credentials given and the system is not registered; skipping subscription and repository enablement",
                );
                return Ok(());
            }
            // Picks up the product certificate installed with the tooling.
            ctx.subscription
                .refresh()
                .context("failed to refresh subscription information")?;
            ctx.renderer.print_status(
                "warn",
                "No credentials given; using the existing system registration",
            );
        }
    }

    let repos = ctx.options.target_repoids.clone();
    ctx.push(RestorableItem::repo_enablement(RepoEnablementBackup::new(
        repos.clone(),
    )))?;
    ctx.renderer
        .print_status("ok", &format!("Enabled repositories: {}", repos.join(", ")));
    Ok(())
}

pub(crate) fn swap_branding_packages(ctx: &mut ConversionContext<'_>) -> Result<()> {
    let swaps = ctx.options.profile.branding_swaps.clone();
    for swap in swaps {
        let installed = ctx.packages.list_installed(&swap.from)?;
        if installed.is_empty() {
            ctx.renderer.print_status(
                "ok",
                &format!("{} is not installed; nothing to replace", swap.from),
            );
            continue;
        }

        let cached = installed
            .iter()
            .filter_map(|nevra| ctx.branding_cache.remove_entry(nevra))
            .collect::<BTreeMap<_, _>>();
        let removal = RestorableItem::packages(
            PackageBackup::removal(installed, ctx.layout.packages_dir()).with_cached_files(cached),
        );
        ctx.push(removal)?;
        let installation = RestorableItem::packages(PackageBackup::installation([swap.to.clone()]));
        let renderer = ctx.renderer;
        with_spinner(renderer, "installing branding", || ctx.push(installation))?;
        ctx.renderer
            .print_status("ok", &format!("Replaced {} with {}", swap.from, swap.to));
    }
    Ok(())
}

pub(crate) fn validate_final_transaction(ctx: &mut ConversionContext<'_>) -> Result<()> {
    let renderer = ctx.renderer;
    let resolvable = with_spinner(renderer, "resolving the final transaction", || {
        ctx.packages.validate_transaction()
    })?;
    if !resolvable {
        return Err(anyhow!(
            "the final package transaction cannot be resolved; converting would leave the system inconsistent"
        ));
    }
    ctx.renderer
        .print_status("ok", "The final package transaction resolves cleanly");
    Ok(())
}

/// Copies a certificate into place, recording the file it replaces.
fn install_certificate(ctx: &mut ConversionContext<'_>, cert: &CertificateSpec) -> Result<()> {
    let target = cert.target_path()?;
    if !cert.source.is_file() {
        return Err(anyhow!("certificate {} not found", cert.source.display()));
    }

    let backup = RestorableItem::file(FileBackup::new(&ctx.layout, &target));
    ctx.push(backup)?;
    copy_certificate(&cert.source, &target)?;
    ctx.renderer
        .print_status("ok", &format!("Installed certificate {}", target.display()));
    Ok(())
}

fn copy_certificate(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::copy(source, target).with_context(|| {
        format!(
            "failed to copy {} to {}",
            source.display(),
            target.display()
        )
    })?;
    Ok(())
}

fn join(packages: &[Nevra]) -> String {
    packages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
