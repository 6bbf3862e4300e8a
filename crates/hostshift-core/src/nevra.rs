use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

const KNOWN_ARCHES: &[&str] = &[
    "x86_64", "i386", "i486", "i586", "i686", "noarch", "aarch64", "ppc64", "ppc64le", "s390x",
];

/// Name-Epoch-Version-Release-Architecture of an installed or available package.
///
/// A zero epoch is stored as `None` so that `bash-0:4.2-1.x86_64` and
/// `bash-4.2-1.x86_64` compare equal. Ordering is lexical over the fields and
/// only gives reports a stable order; it does not compare package versions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Nevra {
    pub name: String,
    pub epoch: Option<u32>,
    pub version: String,
    pub release: String,
    pub arch: Option<String>,
}

impl Nevra {
    pub fn new(
        name: impl Into<String>,
        epoch: Option<u32>,
        version: impl Into<String>,
        release: impl Into<String>,
        arch: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            epoch: epoch.filter(|epoch| *epoch != 0),
            version: version.into(),
            release: release.into(),
            arch: arch.map(str::to_string),
        }
    }

    /// Parses one line produced by the `RPM_QUERY_FORMAT` query format, where
    /// absent epochs and architectures are printed as `(none)`.
    pub fn from_rpm_query(line: &str) -> anyhow::Result<Self> {
        let normalized = line
            .trim()
            .replace("-(none):", "-")
            .replace(".(none)", "");
        normalized
            .parse()
            .with_context(|| format!("invalid rpm query output line: {line}"))
    }

    /// Query format understood by [`Nevra::from_rpm_query`].
    pub const RPM_QUERY_FORMAT: &'static str =
        "%{NAME}-%{EPOCH}:%{VERSION}-%{RELEASE}.%{ARCH}\\n";
}

impl fmt::Display for Nevra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.name)?;
        if let Some(epoch) = self.epoch {
            write!(f, "{epoch}:")?;
        }
        write!(f, "{}-{}", self.version, self.release)?;
        if let Some(arch) = &self.arch {
            write!(f, ".{arch}")?;
        }
        Ok(())
    }
}

impl FromStr for Nevra {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(anyhow!("package identifier must not be empty"));
        }

        let (rest, arch) = match raw.rsplit_once('.') {
            Some((rest, arch)) if KNOWN_ARCHES.contains(&arch) => (rest, Some(arch)),
            _ => (raw, None),
        };

        let (rest, release) = rest
            .rsplit_once('-')
            .ok_or_else(|| anyhow!("missing release in package identifier: {raw}"))?;
        let (name, epoch_version) = rest
            .rsplit_once('-')
            .ok_or_else(|| anyhow!("missing version in package identifier: {raw}"))?;

        let (epoch, version) = match epoch_version.split_once(':') {
            Some((epoch, version)) => {
                let epoch = epoch
                    .parse::<u32>()
                    .with_context(|| format!("invalid epoch in package identifier: {raw}"))?;
                (Some(epoch), version)
            }
            None => (None, epoch_version),
        };

        if name.is_empty() || version.is_empty() || release.is_empty() {
            return Err(anyhow!("incomplete package identifier: {raw}"));
        }

        Ok(Self::new(name, epoch, version, release, arch))
    }
}

impl TryFrom<String> for Nevra {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Nevra> for String {
    fn from(value: Nevra) -> Self {
        value.to_string()
    }
}
