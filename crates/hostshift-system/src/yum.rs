use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use hostshift_backup::PackageManager;
use hostshift_core::{Nevra, PackageManagerKind};
use tracing::{debug, info, warn};

use crate::command::{args, run_checked, CommandRunner};

const GPG_PUBKEY: &str = "gpg-pubkey";

/// Package manager backed by `rpm` for queries and removals, and by `yum` or
/// `dnf` for anything that needs repositories.
pub struct RpmPackageManager<R> {
    runner: R,
    kind: PackageManagerKind,
    releasever: String,
    enabled_repos: Vec<String>,
}

impl<R: CommandRunner> RpmPackageManager<R> {
    pub fn new(runner: R, kind: PackageManagerKind, releasever: impl Into<String>) -> Self {
        Self {
            runner,
            kind,
            releasever: releasever.into(),
            enabled_repos: Vec::new(),
        }
    }

    /// Restricts installs and the validation transaction to `repo_ids`, for
    /// hosts whose target repositories are not managed by subscription-manager.
    pub fn with_enabled_repos(mut self, repo_ids: Vec<String>) -> Self {
        self.enabled_repos = repo_ids;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn frontend(&self) -> &'static str {
        self.kind.binary()
    }

    fn repo_args(&self) -> Vec<String> {
        if self.enabled_repos.is_empty() {
            return Vec::new();
        }
        let mut repo_args = args(["--disablerepo=*"]);
        repo_args.extend(
            self.enabled_repos
                .iter()
                .map(|repo_id| format!("--enablerepo={repo_id}")),
        );
        repo_args
    }

    fn download_one(&self, package: &Nevra, dest: &Path) -> Result<()> {
        let mut command_args = match self.kind {
            PackageManagerKind::Yum => Vec::new(),
            PackageManagerKind::Dnf => args(["download"]),
        };
        command_args.push(format!("--destdir={}", dest.display()));
        command_args.push(package.to_string());
        let program = match self.kind {
            PackageManagerKind::Yum => "yumdownloader",
            PackageManagerKind::Dnf => "dnf",
        };
        run_checked(
            &self.runner,
            program,
            &command_args,
            &format!("failed to download {package}"),
        )?;
        Ok(())
    }
}

impl<R: CommandRunner> PackageManager for RpmPackageManager<R> {
    fn list_installed(&self, pattern: &str) -> Result<Vec<Nevra>> {
        let output = self.runner.run(
            "rpm",
            &args(["-qa", "--queryformat", Nevra::RPM_QUERY_FORMAT, pattern]),
        )?;
        if !output.success() {
            return Err(anyhow!(
                "failed to query installed packages matching '{pattern}': {}",
                output.stderr.trim()
            ));
        }

        let mut packages = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(Nevra::from_rpm_query)
            .collect::<Result<Vec<_>>>()?;
        packages.sort();
        debug!(pattern, found = packages.len(), "queried installed packages");
        Ok(packages)
    }

    fn remove(&mut self, packages: &[Nevra]) -> Result<Vec<Nevra>> {
        let mut removed = Vec::new();
        for package in packages {
            let output = self
                .runner
                .run("rpm", &args(["-e".to_string(), "--nodeps".to_string(), package.to_string()]))?;
            if output.success() {
                info!(package = %package, "removed package");
                removed.push(package.clone());
            } else {
                warn!(
                    package = %package,
                    stderr = %output.stderr.trim(),
                    "could not remove package"
                );
            }
        }
        Ok(removed)
    }

    fn install(&mut self, specs: &[String]) -> Result<Vec<Nevra>> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }
        let mut command_args = args(["install", "-y"]);
        command_args.push(format!("--releasever={}", self.releasever));
        command_args.extend(self.repo_args());
        command_args.extend(specs.iter().cloned());
        run_checked(
            &self.runner,
            self.frontend(),
            &command_args,
            "failed to install packages",
        )?;

        let mut installed = Vec::new();
        for spec in specs {
            let found = self.list_installed(spec)?;
            if found.is_empty() {
                return Err(anyhow!(
                    "{} reported success but {spec} is not installed",
                    self.frontend()
                ));
            }
            installed.extend(found);
        }
        info!(packages = %specs.join(", "), "installed packages");
        Ok(installed)
    }

    fn download(&mut self, packages: &[Nevra], dest: &Path) -> Result<BTreeMap<Nevra, PathBuf>> {
        fs::create_dir_all(dest)
            .with_context(|| format!("failed to create {}", dest.display()))?;

        let mut downloaded = BTreeMap::new();
        for package in packages {
            if let Err(err) = self.download_one(package, dest) {
                warn!(package = %package, "{err:#}");
                continue;
            }
            match find_package_file(dest, package)? {
                Some(path) => {
                    downloaded.insert(package.clone(), path);
                }
                None => warn!(
                    package = %package,
                    dest = %dest.display(),
                    "download reported success but no package file was found"
                ),
            }
        }
        Ok(downloaded)
    }

    fn install_local(&mut self, files: &[PathBuf]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let mut command_args = args(["-i", "--nodeps", "--replacepkgs"]);
        command_args.extend(files.iter().map(|file| file.display().to_string()));
        run_checked(
            &self.runner,
            "rpm",
            &command_args,
            "failed to install local packages",
        )?;
        Ok(())
    }

    fn import_key(&mut self, key: &Path) -> Result<Option<Nevra>> {
        let before = self
            .list_installed(GPG_PUBKEY)?
            .into_iter()
            .collect::<BTreeSet<_>>();
        run_checked(
            &self.runner,
            "rpm",
            &args(["--import".to_string(), key.display().to_string()]),
            &format!("failed to import GPG key {}", key.display()),
        )?;
        let mut added = self
            .list_installed(GPG_PUBKEY)?
            .into_iter()
            .filter(|nevra| !before.contains(nevra));

        let imported = added.next();
        if added.next().is_some() {
            return Err(anyhow!(
                "importing {} added more than one key to the rpm database",
                key.display()
            ));
        }
        match &imported {
            Some(nevra) => info!(key = %key.display(), package = %nevra, "imported GPG key"),
            None => info!(key = %key.display(), "GPG key was already imported"),
        }
        Ok(imported)
    }

    fn clean_metadata(&mut self) -> Result<()> {
        run_checked(
            &self.runner,
            self.frontend(),
            &args(["clean", "metadata", "--quiet"]),
            "failed to clean package metadata",
        )?;
        Ok(())
    }

    fn validate_transaction(&mut self) -> Result<bool> {
        let mut command_args = args(["distro-sync", "-y", "--setopt=tsflags=test"]);
        command_args.push(format!("--releasever={}", self.releasever));
        command_args.extend(self.repo_args());
        let output = self.runner.run(self.frontend(), &command_args)?;
        if output.success() {
            info!("validation transaction resolved cleanly");
            return Ok(true);
        }

        warn!(
            stdout = %output.stdout.trim(),
            stderr = %output.stderr.trim(),
            "validation transaction could not be resolved"
        );
        Ok(false)
    }
}

/// Locates the downloaded file for `package`. Names follow the rpm convention
/// `name-version-release.arch.rpm`; the epoch never appears in them.
fn find_package_file(dir: &Path, package: &Nevra) -> Result<Option<PathBuf>> {
    let stem = format!("{}-{}-{}.", package.name, package.version, package.release);
    let exact = package
        .arch
        .as_ref()
        .map(|arch| format!("{stem}{arch}.rpm"));

    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read {}", dir.display()))?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if exact.as_deref() == Some(file_name.as_str()) {
            return Ok(Some(entry.path()));
        }
        if file_name.starts_with(&stem) && file_name.ends_with(".rpm") {
            candidates.push(entry.path());
        }
    }
    candidates.sort();
    Ok(candidates.into_iter().next())
}
