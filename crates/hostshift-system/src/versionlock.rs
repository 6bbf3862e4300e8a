use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

/// Empties the yum versionlock list. Returns `false` when there was nothing
/// to clear. Callers back the file up first.
pub fn clear_versionlock(path: &Path) -> Result<bool> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    let locked = locked_entries(&raw);
    if locked == 0 {
        return Ok(false);
    }

    fs::write(path, "").with_context(|| format!("failed to clear {}", path.display()))?;
    info!(path = %path.display(), entries = locked, "cleared version locks");
    Ok(true)
}

fn locked_entries(raw: &str) -> usize {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .count()
}
