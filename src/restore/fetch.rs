use std::fs;
use std::path::{Path, PathBuf};

use crate::backup::archive::{checksum_path, parse_checksum, sha256_file};
use crate::error::{Result, VaultError};
use crate::remote::RemoteSync;
use crate::util::paths::is_safe_name;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    Local(PathBuf),
    /// `remote:path/to/archive` in rclone notation.
    Remote(String),
}

impl ArchiveSource {
    /// An argument is remote when it starts with `<name>:` and no such local file exists.
    pub fn parse(arg: &str) -> Self {
        if Path::new(arg).exists() {
            return ArchiveSource::Local(PathBuf::from(arg));
        }
        match arg.split_once(':') {
            Some((name, path)) if is_safe_name(name) && !path.is_empty() => {
                ArchiveSource::Remote(arg.to_string())
            }
            _ => ArchiveSource::Local(PathBuf::from(arg)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ArchiveSource::Local(path) => path.display().to_string(),
            ArchiveSource::Remote(spec) => spec.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedArchive {
    pub path: PathBuf,
    /// Downloaded into the session directory, removed with it.
    pub downloaded: bool,
}

/// Resolves the archive to a local file. Local archives with a sibling checksum
/// file are verified as well.
pub fn fetch(source: &ArchiveSource, sync: &RemoteSync<'_>, session: &Path) -> Result<FetchedArchive> {
    match source {
        ArchiveSource::Local(path) => {
            if !path.is_file() {
                return Err(VaultError::precondition(format!(
                    "archive {} not found",
                    path.display()
                )));
            }
            verify_local(path)?;
            Ok(FetchedArchive {
                path: path.clone(),
                downloaded: false,
            })
        }
        ArchiveSource::Remote(spec) => {
            let path = sync.pull(spec, session)?;
            Ok(FetchedArchive {
                path,
                downloaded: true,
            })
        }
    }
}

fn verify_local(path: &Path) -> Result<()> {
    let sum = checksum_path(path);
    if !sum.exists() {
        tracing::warn!("no checksum file next to {}; not verified", path.display());
        return Ok(());
    }
    let contents = fs::read_to_string(&sum)
        .map_err(|e| VaultError::message(format!("read {}: {}", sum.display(), e)))?;
    let expected = parse_checksum(&contents)
        .ok_or_else(|| VaultError::message(format!("unreadable checksum file {}", sum.display())))?;
    let actual = sha256_file(path)?;
    if actual != expected {
        return Err(VaultError::message(format!(
            "checksum mismatch for {}: expected {}, got {}",
            path.display(),
            expected,
            actual
        )));
    }
    tracing::info!("checksum verified for {}", path.display());
    Ok(())
}
