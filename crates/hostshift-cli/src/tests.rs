use super::*;

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use hostshift_backup::{
    read_journal_records, BackupController, BackupLayout, JournalEvent, JournalRecord,
    LedgerJournal, PackageManager, RestoreFailure, RollbackOutcome, RollbackReport,
    SubscriptionClient,
};
use hostshift_core::{CertificateSpec, ConversionProfile, Credentials, Nevra};

use crate::config::{load_config_file, resolve_options, ConfigFile, ToolOptions};
use crate::conversion::{
    convert, remove_excluded_packages, roll_back, run_conversion, subscribe_and_enable_repos,
    ConversionContext,
};
use crate::dispatch::latest_journal;
use crate::interrupt::is_aborted;
use crate::logging::{archive_previous_log, open_run_log};
use crate::outcome::{format_journal_record, rollback_summary_lines, ConversionExit};
use crate::render::{render_status_line, OutputStyle, TerminalRenderer};

type CallLog = Rc<RefCell<Vec<String>>>;

struct FakePackages {
    installed: BTreeSet<Nevra>,
    unremovable: HashSet<String>,
    local_install_fails: bool,
    resolvable: bool,
    /// Package providing the original distribution's repositories. While it
    /// is set and not installed, `centos-*` packages cannot be fetched.
    original_repos_owner: Option<String>,
    interrupt_on_key_import: Option<Arc<AtomicBool>>,
    log: CallLog,
}

impl FakePackages {
    fn new(log: &CallLog, installed: &[&str]) -> Self {
        Self {
            installed: installed.iter().map(|raw| nevra(raw)).collect(),
            unremovable: HashSet::new(),
            local_install_fails: false,
            resolvable: true,
            original_repos_owner: None,
            interrupt_on_key_import: None,
            log: Rc::clone(log),
        }
    }

    fn record(&self, call: String) {
        self.log.borrow_mut().push(call);
    }

    fn reachable(&self, name: &str) -> bool {
        match &self.original_repos_owner {
            Some(owner) if name.starts_with("centos-") => {
                self.installed.iter().any(|package| &package.name == owner)
            }
            _ => true,
        }
    }
}

fn matches_pattern(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}

impl PackageManager for FakePackages {
    fn list_installed(&self, pattern: &str) -> Result<Vec<Nevra>> {
        Ok(self
            .installed
            .iter()
            .filter(|nevra| matches_pattern(pattern, &nevra.name))
            .cloned()
            .collect())
    }

    fn remove(&mut self, packages: &[Nevra]) -> Result<Vec<Nevra>> {
        let mut removed = Vec::new();
        for package in packages {
            if self.unremovable.contains(&package.name) {
                continue;
            }
            if self.installed.remove(package) {
                self.record(format!("remove {}", package.name));
                removed.push(package.clone());
            }
        }
        Ok(removed)
    }

    fn install(&mut self, specs: &[String]) -> Result<Vec<Nevra>> {
        let mut installed = Vec::new();
        for spec in specs {
            let package = spec
                .parse::<Nevra>()
                .unwrap_or_else(|_| Nevra::new(spec.as_str(), None, "1.0", "1", Some("noarch")));
            if !self.reachable(&package.name) {
                return Err(anyhow!("No package {spec} available."));
            }
            self.record(format!("install {}", package.name));
            self.installed.insert(package.clone());
            installed.push(package);
        }
        Ok(installed)
    }

    fn download(&mut self, packages: &[Nevra], dest: &Path) -> Result<BTreeMap<Nevra, PathBuf>> {
        fs::create_dir_all(dest)?;
        let mut files = BTreeMap::new();
        for package in packages.iter().filter(|package| self.reachable(&package.name)) {
            let path = dest.join(format!("{package}.rpm"));
            fs::write(&path, package.to_string())?;
            files.insert(package.clone(), path);
        }
        Ok(files)
    }

    fn install_local(&mut self, files: &[PathBuf]) -> Result<()> {
        if self.local_install_fails {
            return Err(anyhow!("rpm: transaction check failed"));
        }
        for file in files {
            let package: Nevra = fs::read_to_string(file)?.parse()?;
            self.record(format!("install_local {}", package.name));
            self.installed.insert(package);
        }
        Ok(())
    }

    fn import_key(&mut self, _key: &Path) -> Result<Option<Nevra>> {
        let key = nevra("gpg-pubkey-fd431d51-4ae0493b");
        self.record("import_key".to_string());
        if let Some(flag) = &self.interrupt_on_key_import {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(self.installed.insert(key.clone()).then_some(key))
    }

    fn clean_metadata(&mut self) -> Result<()> {
        self.record("clean_metadata".to_string());
        Ok(())
    }

    fn validate_transaction(&mut self) -> Result<bool> {
        self.record("validate".to_string());
        Ok(self.resolvable)
    }
}

struct FakeSubscription {
    registered: bool,
    enabled: Vec<String>,
    log: CallLog,
}

impl FakeSubscription {
    fn new(log: &CallLog, registered: bool) -> Self {
        Self {
            registered,
            enabled: vec!["base".to_string()],
            log: Rc::clone(log),
        }
    }
}

impl SubscriptionClient for FakeSubscription {
    fn is_registered(&self) -> Result<bool> {
        Ok(self.registered)
    }

    fn register(&mut self, _credentials: &Credentials) -> Result<()> {
        self.log.borrow_mut().push("register".to_string());
        self.registered = true;
        Ok(())
    }

    fn unregister(&mut self) -> Result<()> {
        self.log.borrow_mut().push("unregister".to_string());
        self.registered = false;
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        self.log.borrow_mut().push("refresh".to_string());
        Ok(())
    }

    fn enabled_repo_ids(&self) -> Result<Vec<String>> {
        Ok(self.enabled.clone())
    }

    fn set_enabled_repos(&mut self, repo_ids: &[String]) -> Result<()> {
        self.log
            .borrow_mut()
            .push(format!("set_repos {}", repo_ids.join(",")));
        self.enabled = repo_ids.to_vec();
        Ok(())
    }
}

fn nevra(raw: &str) -> Nevra {
    raw.parse().expect("test nevra must parse")
}

fn new_log() -> CallLog {
    Rc::new(RefCell::new(Vec::new()))
}

fn position(log: &CallLog, call: &str) -> usize {
    log.borrow()
        .iter()
        .position(|entry| entry == call)
        .unwrap_or_else(|| panic!("missing call '{call}' in {:?}", log.borrow()))
}

struct TestEnv {
    dir: tempfile::TempDir,
    options: ToolOptions,
}

impl TestEnv {
    fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    fn context<'a>(
        &self,
        packages: &'a mut FakePackages,
        subscription: &'a mut FakeSubscription,
        interrupt: &'a AtomicBool,
    ) -> ConversionContext<'a> {
        let layout = BackupLayout::new(&self.options.backup_root);
        layout.ensure_base_dirs().expect("must create backup dirs");
        ConversionContext::new(
            self.options.clone(),
            layout,
            BackupController::new(),
            packages,
            subscription,
            TerminalRenderer::from_style(OutputStyle::Plain),
            interrupt,
        )
        .with_os_release(self.path("os-release"))
    }
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("must create parent");
    fs::write(path, content).expect("must write file");
}

fn test_env() -> TestEnv {
    let dir = tempfile::tempdir().expect("must create temp dir");
    let root = dir.path();

    let mut profile = ConversionProfile::builtin().expect("builtin profile");
    profile.backup_root = root.join("backup");
    profile.versionlock_file = root.join("etc/yum/pluginconf.d/versionlock.list");
    profile.repo_dir = root.join("etc/yum.repos.d");
    profile.vars_dir = root.join("etc/yum/vars");
    profile.gpg_keys = vec![root.join("share/RPM-GPG-KEY-redhat-release")];
    profile.cdn_ca_cert = CertificateSpec {
        source: root.join("share/redhat-uep.pem"),
        target_dir: root.join("etc/rhsm/ca"),
    };
    profile.product_cert = CertificateSpec {
        source: root.join("share/69.pem"),
        target_dir: root.join("etc/pki/product-default"),
    };

    write(&profile.versionlock_file, "0:bash-4.2.46-34.el7.*\n");
    write(&profile.repo_dir.join("CentOS-Base.repo"), "[base]\n");
    write(&profile.gpg_keys[0], "key");
    write(&profile.cdn_ca_cert.source, "uep");
    write(&profile.product_cert.source, "product");
    write(
        &root.join("os-release"),
        "NAME=\"CentOS Linux\"\nID=\"centos\"\nVERSION_ID=\"7\"\nPRETTY_NAME=\"CentOS Linux 7 (Core)\"\n",
    );

    let options = ToolOptions {
        target_repoids: profile.target_repoids.clone(),
        backup_root: profile.backup_root.clone(),
        profile,
        credentials: None,
        no_rhsm: true,
    };
    TestEnv { dir, options }
}

fn password() -> Credentials {
    Credentials::Password {
        username: "admin".to_string(),
        password: "secret".to_string(),
    }
}

const SUBSCRIPTION_TOOLING: &[&str] = &[
    "subscription-manager-1.24.54-1.el7.x86_64",
    "subscription-manager-rhsm-certificates-1.24.54-1.el7.x86_64",
    "python-syspurpose-1.24.54-1.el7.x86_64",
];

#[test]
fn no_installed_excluded_packages_removes_nothing() {
    let env = test_env();
    let log = new_log();
    let mut packages = FakePackages::new(&log, &["bash-4.2.46-34.el7.x86_64"]);
    let mut subscription = FakeSubscription::new(&log, true);
    let interrupt = AtomicBool::new(false);
    let mut ctx = env.context(&mut packages, &mut subscription, &interrupt);

    remove_excluded_packages(&mut ctx).expect("step must succeed");

    assert!(ctx.ledger.is_empty());
    assert!(log.borrow().is_empty(), "no package command expected");
}

#[test]
fn partially_removed_packages_are_recorded() {
    let env = test_env();
    let log = new_log();
    let mut packages = FakePackages::new(
        &log,
        &[
            "rhnsd-5.0.13-10.el7.x86_64",
            "yum-rhn-plugin-2.0.1-10.el7.noarch",
        ],
    );
    packages.unremovable.insert("rhnsd".to_string());
    let mut subscription = FakeSubscription::new(&log, true);
    let interrupt = AtomicBool::new(false);
    let mut ctx = env.context(&mut packages, &mut subscription, &interrupt);

    remove_excluded_packages(&mut ctx).expect("step must succeed");

    let descriptions = ctx.ledger.descriptions();
    assert_eq!(descriptions.len(), 1);
    assert!(descriptions[0].contains("yum-rhn-plugin"), "{descriptions:?}");
    assert!(!descriptions[0].contains("rhnsd"), "{descriptions:?}");
}

#[test]
fn successful_conversion_commits_the_ledger() {
    let env = test_env();
    let log = new_log();
    let mut installed = vec!["centos-logos-70.0.6-3.el7.centos.noarch"];
    installed.extend_from_slice(SUBSCRIPTION_TOOLING);
    let mut packages = FakePackages::new(&log, &installed);
    let mut subscription = FakeSubscription::new(&log, true);
    let interrupt = AtomicBool::new(false);

    let mut options = env.options.clone();
    options.no_rhsm = false;
    let env = TestEnv { options, ..env };
    let mut ctx = env.context(&mut packages, &mut subscription, &interrupt);
    let journal = LedgerJournal::create(&ctx.layout, "run-1").expect("journal");
    let journal_path = journal.path().to_path_buf();
    ctx.ledger = BackupController::with_journal(journal);

    assert_eq!(run_conversion(&mut ctx), ConversionExit::Converted);
    drop(ctx);

    assert!(!log.borrow().contains(&"register".to_string()));
    assert!(log.borrow().contains(&"set_repos rhel-7-server-rpms".to_string()));
    assert!(log.borrow().contains(&"install redhat-logos".to_string()));
    assert_eq!(
        fs::read_to_string(&env.options.profile.versionlock_file).expect("read"),
        ""
    );
    assert!(env.path("etc/pki/product-default/69.pem").exists());

    let records = read_journal_records(&journal_path).expect("journal must parse");
    assert_eq!(
        records.last().map(|record| record.event),
        Some(JournalEvent::Commit)
    );
}

#[test]
fn failed_validation_rolls_back_in_reverse_order() {
    let env = test_env();
    let log = new_log();
    let mut packages = FakePackages::new(&log, &["centos-logos-70.0.6-3.el7.centos.noarch"]);
    packages.resolvable = false;
    let mut subscription = FakeSubscription::new(&log, false);
    let interrupt = AtomicBool::new(false);
    let mut ctx = env.context(&mut packages, &mut subscription, &interrupt);

    let exit = run_conversion(&mut ctx);
    assert_eq!(exit, ConversionExit::RolledBack);
    assert_eq!(exit.code(), 1);
    assert!(ctx.ledger.is_empty());
    drop(ctx);

    let branding_removed = position(&log, "remove redhat-logos");
    let logos_reinstalled = position(&log, "install_local centos-logos");
    let key_removed = position(&log, "remove gpg-pubkey");
    assert!(branding_removed < logos_reinstalled);
    assert!(logos_reinstalled < key_removed);

    assert_eq!(
        fs::read_to_string(&env.options.profile.versionlock_file).expect("read"),
        "0:bash-4.2.46-34.el7.*\n"
    );
    assert!(!env.path("etc/rhsm/ca/redhat-uep.pem").exists());
    assert!(env.path("etc/yum.repos.d/CentOS-Base.repo").exists());
}

#[test]
fn failed_restore_reports_incomplete_rollback() {
    let env = test_env();
    let log = new_log();
    let mut packages = FakePackages::new(&log, &["centos-logos-70.0.6-3.el7.centos.noarch"]);
    packages.resolvable = false;
    packages.local_install_fails = true;
    let mut subscription = FakeSubscription::new(&log, true);
    let interrupt = AtomicBool::new(false);
    let mut ctx = env.context(&mut packages, &mut subscription, &interrupt);

    let exit = run_conversion(&mut ctx);
    assert_eq!(exit, ConversionExit::RollbackIncomplete);
    assert_eq!(exit.code(), 2);
    drop(ctx);

    // Items older than the failed one were still restored.
    assert!(log.borrow().contains(&"remove gpg-pubkey".to_string()));
    assert_eq!(
        fs::read_to_string(&env.options.profile.versionlock_file).expect("read"),
        "0:bash-4.2.46-34.el7.*\n"
    );
}

#[test]
fn pending_interrupt_stops_before_the_first_step() {
    let env = test_env();
    let log = new_log();
    let mut packages = FakePackages::new(&log, &[]);
    let mut subscription = FakeSubscription::new(&log, true);
    let interrupt = AtomicBool::new(true);
    let mut ctx = env.context(&mut packages, &mut subscription, &interrupt);

    assert_eq!(run_conversion(&mut ctx), ConversionExit::RolledBack);
    drop(ctx);
    assert!(log.borrow().is_empty());
}

#[test]
fn registration_made_by_the_run_is_undone_with_its_tooling() {
    let env = test_env();
    let log = new_log();
    let mut packages = FakePackages::new(&log, &[]);
    packages.resolvable = false;
    let mut subscription = FakeSubscription::new(&log, false);
    let interrupt = AtomicBool::new(false);

    let mut options = env.options.clone();
    options.no_rhsm = false;
    options.credentials = Some(password());
    let env = TestEnv { options, ..env };
    let mut ctx = env.context(&mut packages, &mut subscription, &interrupt);

    assert_eq!(run_conversion(&mut ctx), ConversionExit::RolledBack);
    drop(ctx);

    let registered = position(&log, "register");
    let repos_restored = position(&log, "set_repos base");
    let unregistered = position(&log, "unregister");
    let tooling_removed = position(&log, "remove subscription-manager");
    let key_removed = position(&log, "remove gpg-pubkey");
    assert!(registered < repos_restored);
    assert!(repos_restored < unregistered);
    assert!(unregistered < tooling_removed);
    assert!(tooling_removed < key_removed);
    assert!(!env.path("etc/pki/product-default/69.pem").exists());
}

#[test]
fn existing_registration_is_kept_without_credentials() {
    let env = test_env();
    let log = new_log();
    let mut packages = FakePackages::new(&log, &[]);
    let mut subscription = FakeSubscription::new(&log, true);
    let interrupt = AtomicBool::new(false);
    let mut options = env.options.clone();
    options.no_rhsm = false;
    let env = TestEnv { options, ..env };
    let mut ctx = env.context(&mut packages, &mut subscription, &interrupt);

    subscribe_and_enable_repos(&mut ctx).expect("step must succeed");
    assert_eq!(ctx.ledger.len(), 1);
    drop(ctx);
    assert_eq!(*log.borrow(), vec!["refresh", "set_repos rhel-7-server-rpms"]);
}

#[test]
fn unregistered_host_without_credentials_skips_subscription() {
    let env = test_env();
    let log = new_log();
    let mut packages = FakePackages::new(&log, &[]);
    let mut subscription = FakeSubscription::new(&log, false);
    let interrupt = AtomicBool::new(false);
    let mut options = env.options.clone();
    options.no_rhsm = false;
    let env = TestEnv { options, ..env };
    let mut ctx = env.context(&mut packages, &mut subscription, &interrupt);

    subscribe_and_enable_repos(&mut ctx).expect("step must not abort the run");
    assert!(ctx.ledger.is_empty());
    drop(ctx);
    assert!(log.borrow().is_empty(), "no refresh and no repository changes");
}

#[test]
fn cli_flags_override_config_file() {
    let args = ConvertArgs {
        username: Some("cli-user".to_string()),
        password: Some("cli-pass".to_string()),
        enable_repo: vec!["rhel-7-server-optional-rpms".to_string()],
        backup_dir: Some(PathBuf::from("/srv/hostshift-backup")),
        ..ConvertArgs::default()
    };
    let file: ConfigFile = toml::from_str(
        r#"
[subscription]
org = "acme"
activation_key = "file-key"

[conversion]
backup_dir = "/var/tmp/ignored"
enable_repos = ["ignored-repo"]
"#,
    )
    .expect("config must parse");

    let options = resolve_options(&args, file).expect("options must resolve");
    assert_eq!(
        options.credentials,
        Some(Credentials::Password {
            username: "cli-user".to_string(),
            password: "cli-pass".to_string(),
        })
    );
    assert_eq!(options.target_repoids, vec!["rhel-7-server-optional-rpms"]);
    assert_eq!(options.backup_root, PathBuf::from("/srv/hostshift-backup"));
    assert!(!options.no_rhsm);
}

#[test]
fn config_file_supplies_missing_values() {
    let file: ConfigFile = toml::from_str(
        r#"
[subscription]
org = "acme"
activation_key = "file-key"

[conversion]
no_rhsm = false
"#,
    )
    .expect("config must parse");

    let options = resolve_options(&ConvertArgs::default(), file).expect("options must resolve");
    assert_eq!(
        options.credentials.as_ref().map(Credentials::method),
        Some("activation key")
    );
    assert_eq!(options.target_repoids, vec!["rhel-7-server-rpms"]);
    assert_eq!(
        options.backup_root,
        PathBuf::from("/var/lib/hostshift/backup")
    );
}

#[test]
fn no_rhsm_drops_credentials() {
    let args = ConvertArgs {
        org: Some("acme".to_string()),
        activation_key: Some("key".to_string()),
        no_rhsm: true,
        enable_repo: vec!["local-rhel-7".to_string()],
        ..ConvertArgs::default()
    };
    let options = resolve_options(&args, ConfigFile::default()).expect("options must resolve");
    assert!(options.no_rhsm);
    assert!(options.credentials.is_none());
    assert_eq!(options.target_repoids, vec!["local-rhel-7"]);
}

#[test]
fn no_rhsm_requires_explicit_repos() {
    let args = ConvertArgs {
        no_rhsm: true,
        ..ConvertArgs::default()
    };
    let err = resolve_options(&args, ConfigFile::default()).expect_err("must reject");
    assert!(err.to_string().contains("--enable-repo"), "{err}");

    let file: ConfigFile = toml::from_str(
        r#"
[conversion]
no_rhsm = true
enable_repos = ["local-rhel-7"]
"#,
    )
    .expect("config must parse");
    let options = resolve_options(&ConvertArgs::default(), file).expect("options must resolve");
    assert_eq!(options.target_repoids, vec!["local-rhel-7"]);
}

#[test]
fn half_given_credentials_are_rejected() {
    let args = ConvertArgs {
        username: Some("admin".to_string()),
        ..ConvertArgs::default()
    };
    let err = resolve_options(&args, ConfigFile::default()).expect_err("must reject");
    assert!(err.to_string().contains("password=missing"), "{err}");
}

#[test]
fn config_file_with_secrets_must_be_private() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("must create temp dir");
    let path = dir.path().join("hostshift.toml");
    fs::write(&path, "[subscription]\nusername = \"admin\"\npassword = \"secret\"\n")
        .expect("write config");

    fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).expect("chmod");
    let err = load_config_file(Some(&path), Path::new("/nonexistent"))
        .expect_err("readable secrets must be rejected");
    assert!(err.to_string().contains("restrict it to 600"), "{err}");

    fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).expect("chmod");
    let config = load_config_file(Some(&path), Path::new("/nonexistent")).expect("must load");
    assert_eq!(config.subscription.username.as_deref(), Some("admin"));
}

#[test]
fn missing_default_config_is_not_an_error() {
    let dir = tempfile::tempdir().expect("must create temp dir");
    let default_path = dir.path().join("hostshift.toml");
    assert_eq!(
        load_config_file(None, &default_path).expect("must load"),
        ConfigFile::default()
    );
    assert!(load_config_file(Some(&default_path), &default_path).is_err());
}

#[test]
fn unknown_config_keys_are_rejected() {
    let parsed = toml::from_str::<ConfigFile>("[subscription]\nuser = \"admin\"\n");
    assert!(parsed.is_err());
}

#[test]
fn previous_log_is_archived_with_timestamp() {
    let dir = tempfile::tempdir().expect("must create temp dir");
    assert_eq!(
        archive_previous_log(dir.path(), 1_771_000_000).expect("nothing to archive"),
        None
    );

    fs::write(dir.path().join("hostshift.log"), "previous run").expect("seed log");
    let archived = archive_previous_log(dir.path(), 1_771_000_000)
        .expect("must archive")
        .expect("log must be archived");
    assert_eq!(
        archived,
        dir.path().join("archive").join("hostshift-1771000000.log")
    );
    assert_eq!(fs::read_to_string(&archived).expect("read"), "previous run");
    assert!(!dir.path().join("hostshift.log").exists());
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "removed centos-logos"),
        "removed centos-logos"
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "ok", "removed centos-logos"),
        "[OK] removed centos-logos"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "packages were not removed"),
        "[WARN] packages were not removed"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "error", "conversion failed"),
        "[ERR] conversion failed"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "step", "resolving"),
        "[..] resolving"
    );
}

#[test]
fn convert_command_parses_repeatable_repos() {
    let cli = Cli::try_parse_from([
        "hostshift",
        "--debug",
        "convert",
        "--org",
        "acme",
        "--activation-key",
        "key",
        "--enable-repo",
        "rhel-7-server-rpms",
        "--enable-repo",
        "rhel-7-server-optional-rpms",
    ])
    .expect("must parse");

    assert!(cli.debug);
    let Commands::Convert(args) = cli.command else {
        panic!("expected convert command");
    };
    assert_eq!(args.org.as_deref(), Some("acme"));
    assert_eq!(args.enable_repo.len(), 2);
    assert!(!args.no_rhsm);
}

#[test]
fn journal_command_parses_run_id() {
    let cli = Cli::try_parse_from(["hostshift", "journal", "run-1771000000-42", "--json"])
        .expect("must parse");
    let Commands::Journal(args) = cli.command else {
        panic!("expected journal command");
    };
    assert_eq!(args.run_id.as_deref(), Some("run-1771000000-42"));
    assert!(args.json);
}

#[test]
fn exit_codes_follow_process_contract() {
    assert_eq!(ConversionExit::Converted.code(), 0);
    assert_eq!(ConversionExit::RolledBack.code(), 1);
    assert_eq!(ConversionExit::RollbackIncomplete.code(), 2);
    assert_eq!(ConversionExit::UsageError.code(), 3);
}

#[test]
fn incomplete_rollback_summary_lists_failures() {
    let report = RollbackReport {
        restored: vec!["file /etc/yum/pluginconf.d/versionlock.list".to_string()],
        skipped: Vec::new(),
        failures: vec![RestoreFailure {
            item: "packages removed: centos-logos-70.0.6-3.el7.centos.noarch".to_string(),
            error: "rpm: transaction check failed".to_string(),
        }],
    };
    let lines = rollback_summary_lines(&RollbackOutcome::ManualInterventionRequired(report), true);

    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("internal error"));
    assert!(lines[1].contains("1 of 2"));
    assert!(lines[2].contains("centos-logos") && lines[2].contains("transaction check failed"));
}

#[test]
fn latest_journal_follows_run_timestamp() {
    let dir = tempfile::tempdir().expect("must create temp dir");
    let layout = BackupLayout::new(dir.path());
    assert_eq!(latest_journal(&layout).expect("no journals"), None);

    LedgerJournal::create(&layout, "run-1771000900-7").expect("journal");
    LedgerJournal::create(&layout, "run-1771000000-99").expect("journal");
    assert_eq!(
        latest_journal(&layout).expect("must scan"),
        Some(layout.journal_path("run-1771000900-7"))
    );
}

#[test]
fn journal_record_formats_as_one_line() {
    let record = JournalRecord {
        seq: 3,
        event: JournalEvent::Failed,
        item_id: Some(12),
        item: Some("file /etc/rhsm/ca/redhat-uep.pem".to_string()),
        detail: Some("permission denied".to_string()),
        at_unix: 1_771_000_000,
    };
    assert_eq!(
        format_journal_record(&record),
        "   3 failed    file /etc/rhsm/ca/redhat-uep.pem (permission denied)"
    );
}

#[test]
fn branding_rollback_reinstalls_from_packages_cached_before_repo_removal() {
    let env = test_env();
    let log = new_log();
    let mut packages = FakePackages::new(
        &log,
        &[
            "centos-release-7-9.2009.1.el7.centos.x86_64",
            "centos-logos-70.0.6-3.el7.centos.noarch",
        ],
    );
    packages.original_repos_owner = Some("centos-release".to_string());
    packages.resolvable = false;
    let mut subscription = FakeSubscription::new(&log, true);
    let interrupt = AtomicBool::new(false);
    let mut ctx = env.context(&mut packages, &mut subscription, &interrupt);

    assert_eq!(run_conversion(&mut ctx), ConversionExit::RolledBack);
    drop(ctx);

    let release_removed = position(&log, "remove centos-release");
    let logos_removed = position(&log, "remove centos-logos");
    let logos_reinstalled = position(&log, "install_local centos-logos");
    let release_reinstalled = position(&log, "install_local centos-release");
    assert!(release_removed < logos_removed);
    assert!(logos_reinstalled < release_reinstalled);
    assert!(packages
        .installed
        .iter()
        .any(|package| package.name == "centos-logos"));
}

#[test]
fn interrupt_during_a_step_rolls_back_recorded_changes() {
    let env = test_env();
    let log = new_log();
    let flag = Arc::new(AtomicBool::new(false));
    let mut packages = FakePackages::new(&log, &[]);
    packages.interrupt_on_key_import = Some(Arc::clone(&flag));
    let mut subscription = FakeSubscription::new(&log, true);
    let mut ctx = env.context(&mut packages, &mut subscription, &flag);

    let err = convert(&mut ctx).expect_err("the interrupt must stop the run");
    assert!(is_aborted(&err), "{err:#}");
    // Version lock, GPG key and CA certificate.
    assert_eq!(ctx.ledger.len(), 3);

    let outcome = roll_back(&mut ctx);
    assert_eq!(
        ConversionExit::from_rollback(&outcome),
        ConversionExit::RolledBack
    );
    assert!(ctx.ledger.is_empty());
    drop(ctx);

    assert!(log.borrow().contains(&"remove gpg-pubkey".to_string()));
    assert!(!log.borrow().contains(&"validate".to_string()));
    assert!(!env.path("etc/rhsm/ca/redhat-uep.pem").exists());
    assert_eq!(
        fs::read_to_string(&env.options.profile.versionlock_file).expect("read"),
        "0:bash-4.2.46-34.el7.*\n"
    );
}

#[test]
fn interrupted_run_exits_as_rolled_back() {
    let env = test_env();
    let log = new_log();
    let flag = Arc::new(AtomicBool::new(false));
    let mut packages = FakePackages::new(&log, &[]);
    packages.interrupt_on_key_import = Some(Arc::clone(&flag));
    let mut subscription = FakeSubscription::new(&log, true);
    let mut ctx = env.context(&mut packages, &mut subscription, &flag);

    assert_eq!(run_conversion(&mut ctx), ConversionExit::RolledBack);
    drop(ctx);
    assert!(log.borrow().contains(&"remove gpg-pubkey".to_string()));
}

#[test]
fn unarchivable_log_is_appended_to() {
    let dir = tempfile::tempdir().expect("must create temp dir");
    fs::write(dir.path().join("hostshift.log"), "previous run\n").expect("seed log");
    // A plain file where the archive directory belongs.
    fs::write(dir.path().join("archive"), "").expect("seed blocker");

    let run_log = open_run_log(dir.path(), 1_771_000_000).expect("logging must still start");
    assert!(run_log.archive_error.is_some());
    assert_eq!(run_log.path, dir.path().join("hostshift.log"));
    assert_eq!(
        fs::read_to_string(&run_log.path).expect("read"),
        "previous run\n"
    );
}
