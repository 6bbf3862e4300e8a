use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use hostshift_core::{ConversionProfile, Credentials};
use serde::Deserialize;
use tracing::{info, warn};

use crate::ConvertArgs;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/hostshift/hostshift.toml";

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub org: Option<String>,
    pub activation_key: Option<String>,
}

impl SubscriptionConfig {
    fn has_secret(&self) -> bool {
        self.password.is_some() || self.activation_key.is_some()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversionConfig {
    pub profile: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    #[serde(default)]
    pub enable_repos: Vec<String>,
    #[serde(default)]
    pub no_rhsm: bool,
}

/// Everything the conversion needs to know before it touches the host.
#[derive(Debug, Clone)]
pub struct ToolOptions {
    pub profile: ConversionProfile,
    pub credentials: Option<Credentials>,
    pub no_rhsm: bool,
    pub target_repoids: Vec<String>,
    pub backup_root: PathBuf,
}

pub fn load_tool_options(args: &ConvertArgs) -> Result<ToolOptions> {
    let file = load_config_file(args.config.as_deref(), Path::new(DEFAULT_CONFIG_PATH))?;
    resolve_options(args, file)
}

/// Reads the config file. An explicitly requested file must exist; the default
/// location is optional.
pub fn load_config_file(explicit: Option<&Path>, default_path: &Path) -> Result<ConfigFile> {
    let path = match explicit {
        Some(path) => path,
        None if default_path.exists() => default_path,
        None => return Ok(ConfigFile::default()),
    };

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    if config.subscription.has_secret() {
        ensure_private(path)?;
    }
    info!(path = %path.display(), "loaded config file");
    Ok(config)
}

#[cfg(unix)]
fn ensure_private(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)
        .with_context(|| format!("failed to stat config file {}", path.display()))?
        .permissions()
        .mode();
    if mode & 0o077 != 0 {
        return Err(anyhow!(
            "config file {} holds credentials but has mode {:o}; restrict it to 600",
            path.display(),
            mode & 0o777
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_private(_path: &Path) -> Result<()> {
    Ok(())
}

/// Merges command line flags over the config file. Credentials are taken as a
/// set: any credential flag on the command line replaces all credentials from
/// the file.
pub fn resolve_options(args: &ConvertArgs, file: ConfigFile) -> Result<ToolOptions> {
    let cli_has_credentials = args.username.is_some()
        || args.password.is_some()
        || args.org.is_some()
        || args.activation_key.is_some();
    let credentials = if cli_has_credentials {
        Credentials::from_parts(
            args.username.clone(),
            args.password.clone(),
            args.org.clone(),
            args.activation_key.clone(),
        )?
    } else {
        let sub = file.subscription;
        Credentials::from_parts(sub.username, sub.password, sub.org, sub.activation_key)
            .context("invalid credentials in config file")?
    };

    let profile = match args.profile.as_ref().or(file.conversion.profile.as_ref()) {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read profile {}", path.display()))?;
            ConversionProfile::from_toml_str(&raw)
                .with_context(|| format!("invalid profile {}", path.display()))?
        }
        None => ConversionProfile::builtin()?,
    };

    let no_rhsm = args.no_rhsm || file.conversion.no_rhsm;
    let credentials = match credentials {
        Some(_) if no_rhsm => {
            warn!("subscription tooling is disabled; ignoring registration credentials");
            None
        }
        credentials => credentials,
    };

    let requested_repos = if !args.enable_repo.is_empty() {
        Some(args.enable_repo.clone())
    } else if !file.conversion.enable_repos.is_empty() {
        Some(file.conversion.enable_repos)
    } else {
        None
    };
    // Without subscription-manager nothing else knows where the target
    // packages live.
    if no_rhsm && requested_repos.is_none() {
        return Err(anyhow!(
            "the --enable-repo option is required when --no-rhsm is used"
        ));
    }
    let target_repoids = requested_repos.unwrap_or_else(|| profile.target_repoids.clone());

    let backup_root = args
        .backup_dir
        .clone()
        .or(file.conversion.backup_dir)
        .unwrap_or_else(|| profile.backup_root.clone());

    Ok(ToolOptions {
        profile,
        credentials,
        no_rhsm,
        target_repoids,
        backup_root,
    })
}
