use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

pub const OS_RELEASE_PATH: &str = "/etc/os-release";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub id: String,
    pub name: String,
    pub version_id: String,
    pub pretty_name: String,
    pub arch: String,
}

impl SystemInfo {
    pub fn detect(os_release: &Path) -> Result<Self> {
        let raw = fs::read_to_string(os_release)
            .with_context(|| format!("failed to read {}", os_release.display()))?;
        Self::from_os_release(&raw, std::env::consts::ARCH)
    }

    pub fn from_os_release(raw: &str, arch: &str) -> Result<Self> {
        let fields = parse_os_release(raw);
        let field = |key: &str| -> Result<String> {
            fields
                .get(key)
                .cloned()
                .ok_or_else(|| anyhow!("os-release is missing {key}"))
        };

        let id = field("ID")?;
        let name = field("NAME")?;
        let version_id = field("VERSION_ID")?;
        let pretty_name = fields
            .get("PRETTY_NAME")
            .cloned()
            .unwrap_or_else(|| format!("{name} {version_id}"));
        Ok(Self {
            id,
            name,
            version_id,
            pretty_name,
            arch: arch.to_string(),
        })
    }

    pub fn major_version(&self) -> &str {
        self.version_id
            .split('.')
            .next()
            .unwrap_or(&self.version_id)
    }
}

/// Parses `KEY=value` lines, dropping comments and one level of quoting.
pub fn parse_os_release(raw: &str) -> BTreeMap<String, String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), unquote(value.trim()).to_string()))
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}
