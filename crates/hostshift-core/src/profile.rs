use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

/// Profile shipped with the tool for CentOS Linux 7 hosts.
pub const BUILTIN_EL7_PROFILE: &str = r#"
name = "centos-7-to-rhel-7"
package_manager = "yum"
releasever = "7Server"
backup_root = "/var/lib/hostshift/backup"
versionlock_file = "/etc/yum/pluginconf.d/versionlock.list"
repo_dir = "/etc/yum.repos.d"
vars_dir = "/etc/yum/vars"
excluded_pkgs = ["centos-release-cr", "centos-release-scl", "rhn*", "yum-rhn-plugin", "libreport-centos", "abrt-plugin-rhtsupport"]
repofile_pkgs = ["centos-release", "epel-release"]
subscription_pkgs = ["subscription-manager", "subscription-manager-rhsm-certificates", "python-syspurpose"]
target_repoids = ["rhel-7-server-rpms"]
gpg_keys = ["/usr/share/hostshift/gpg-keys/RPM-GPG-KEY-redhat-release"]

[cdn_ca_cert]
source = "/usr/share/hostshift/redhat-uep.pem"
target_dir = "/etc/rhsm/ca"

[product_cert]
source = "/usr/share/hostshift/rhel-certs/69.pem"
target_dir = "/etc/pki/product-default"

[[branding_swaps]]
from = "centos-logos"
to = "redhat-logos"
"#;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    Yum,
    Dnf,
}

impl PackageManagerKind {
    pub fn binary(self) -> &'static str {
        match self {
            Self::Yum => "yum",
            Self::Dnf => "dnf",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificateSpec {
    pub source: PathBuf,
    pub target_dir: PathBuf,
}

impl CertificateSpec {
    pub fn target_path(&self) -> anyhow::Result<PathBuf> {
        let file_name = self
            .source
            .file_name()
            .ok_or_else(|| anyhow!("certificate source has no file name: {}", self.source.display()))?;
        Ok(self.target_dir.join(file_name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrandingSwap {
    pub from: String,
    pub to: String,
}

/// Everything that differs between source distributions: which packages go,
/// which repositories come in, and where trust material lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversionProfile {
    pub name: String,
    pub package_manager: PackageManagerKind,
    pub releasever: String,
    pub backup_root: PathBuf,
    pub versionlock_file: PathBuf,
    pub repo_dir: PathBuf,
    pub vars_dir: PathBuf,
    #[serde(default)]
    pub excluded_pkgs: Vec<String>,
    #[serde(default)]
    pub repofile_pkgs: Vec<String>,
    #[serde(default)]
    pub subscription_pkgs: Vec<String>,
    pub target_repoids: Vec<String>,
    #[serde(default)]
    pub gpg_keys: Vec<PathBuf>,
    pub cdn_ca_cert: CertificateSpec,
    pub product_cert: CertificateSpec,
    #[serde(default)]
    pub branding_swaps: Vec<BrandingSwap>,
}

impl ConversionProfile {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let profile: Self =
            toml::from_str(input).context("failed to parse hostshift conversion profile")?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_toml_str(BUILTIN_EL7_PROFILE)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("profile name must not be empty"));
        }
        if self.target_repoids.is_empty() {
            return Err(anyhow!(
                "profile '{}' must name at least one target repository",
                self.name
            ));
        }
        for (field, patterns) in [
            ("excluded_pkgs", &self.excluded_pkgs),
            ("repofile_pkgs", &self.repofile_pkgs),
            ("subscription_pkgs", &self.subscription_pkgs),
            ("target_repoids", &self.target_repoids),
        ] {
            if patterns.iter().any(|pattern| pattern.trim().is_empty()) {
                return Err(anyhow!(
                    "profile '{}' has an empty entry in {field}",
                    self.name
                ));
            }
        }
        for cert in [&self.cdn_ca_cert, &self.product_cert] {
            cert.target_path()
                .with_context(|| format!("invalid certificate in profile '{}'", self.name))?;
        }

        let mut seen_from = HashSet::new();
        for swap in &self.branding_swaps {
            if swap.from.trim().is_empty() || swap.to.trim().is_empty() {
                return Err(anyhow!(
                    "branding swap in profile '{}' must name both packages",
                    self.name
                ));
            }
            if swap.from == swap.to {
                return Err(anyhow!("branding swap replaces '{}' with itself", swap.from));
            }
            if !seen_from.insert(swap.from.as_str()) {
                return Err(anyhow!("duplicate branding swap for '{}'", swap.from));
            }
        }

        Ok(())
    }
}
