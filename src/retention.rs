//! Local archive retention.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::backup::archive::{is_archive_file, CHECKSUM_SUFFIX, WORK_PREFIX};
use crate::error::{Result, VaultError};
use crate::util::paths::list_entries;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub archives: Vec<String>,
    pub work_dirs: Vec<String>,
}

fn is_expired(path: &Path, cutoff: SystemTime) -> Result<bool> {
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| VaultError::message(format!("stat {}: {}", path.display(), e)))?;
    Ok(modified < cutoff)
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

/// Deletes archives and their checksums whose mtime is older than `retention_days`
/// before `now`, and empty `work_*` directories left by interrupted runs.
pub fn prune_local(backup_dir: &Path, retention_days: u32, now: SystemTime) -> Result<PruneReport> {
    let mut report = PruneReport::default();
    if !backup_dir.is_dir() {
        return Ok(report);
    }
    let cutoff = now
        .checked_sub(DAY * retention_days)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let work_prefix = format!("{}_", WORK_PREFIX);

    for name in list_entries(backup_dir)? {
        let path = backup_dir.join(&name);
        let archive_name = name.strip_suffix(CHECKSUM_SUFFIX).unwrap_or(&name);
        if is_archive_file(archive_name) && path.is_file() {
            if is_expired(&path, cutoff)? {
                fs::remove_file(&path)
                    .map_err(|e| VaultError::message(format!("remove {}: {}", path.display(), e)))?;
                tracing::info!("pruned {}", name);
                report.archives.push(name);
            }
        } else if name.starts_with(&work_prefix) && path.is_dir() && is_empty_dir(&path) {
            fs::remove_dir(&path)
                .map_err(|e| VaultError::message(format!("remove {}: {}", path.display(), e)))?;
            tracing::info!("removed leftover {}", name);
            report.work_dirs.push(name);
        }
    }
    Ok(report)
}
