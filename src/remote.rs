//! Remote replication through rclone.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::backup::archive::{
    checksum_path, is_archive_file, parse_checksum, remove_if_exists, sha256_file,
    CHECKSUM_SUFFIX,
};
use crate::config::model::RemoteTarget;
use crate::error::{Result, VaultError};
use crate::types::RunMode;
use crate::util::command::{capture_command, checked_output};
use crate::util::retry::{Clock, RetryPolicy};

const TRANSFER_ATTEMPTS: u32 = 3;
const TRANSFER_BACKOFF: Duration = Duration::from_secs(5);

pub trait RemoteStore: Sync {
    fn upload(&self, local: &Path, remote: &str) -> Result<()>;
    fn download(&self, remote: &str, local: &Path) -> Result<()>;
    fn exists(&self, remote: &str) -> Result<bool>;
    /// File names directly under `prefix`, optionally only those older than `min_age_days`.
    fn list(&self, prefix: &str, min_age_days: Option<u32>) -> Result<Vec<String>>;
    fn delete(&self, remote: &str) -> Result<()>;
}

pub struct Rclone {
    run_mode: RunMode,
}

impl Rclone {
    pub fn new(run_mode: RunMode) -> Self {
        Self { run_mode }
    }
}

impl RemoteStore for Rclone {
    fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let mut cmd = Command::new("rclone");
        cmd.arg("copyto").arg(local).arg(remote);
        checked_output(&mut cmd, self.run_mode).map(|_| ())
    }

    fn download(&self, remote: &str, local: &Path) -> Result<()> {
        let mut cmd = Command::new("rclone");
        cmd.arg("copyto").arg(remote).arg(local);
        checked_output(&mut cmd, self.run_mode).map(|_| ())
    }

    fn exists(&self, remote: &str) -> Result<bool> {
        let mut cmd = Command::new("rclone");
        cmd.arg("lsf").arg("--files-only").arg(remote);
        let output = capture_command(&mut cmd, self.run_mode)?;
        lookup_outcome(
            output.status.code(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        )
        .map_err(|e| VaultError::message(format!("rclone lsf {}: {}", remote, e)))
    }

    fn list(&self, prefix: &str, min_age_days: Option<u32>) -> Result<Vec<String>> {
        let mut cmd = Command::new("rclone");
        cmd.arg("lsf").arg("--files-only");
        if let Some(days) = min_age_days {
            cmd.arg("--min-age").arg(format!("{}d", days));
        }
        cmd.arg(prefix);
        let stdout = checked_output(&mut cmd, self.run_mode)?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    fn delete(&self, remote: &str) -> Result<()> {
        let mut cmd = Command::new("rclone");
        cmd.arg("deletefile").arg(remote);
        checked_output(&mut cmd, self.run_mode).map(|_| ())
    }
}

/// rclone exit codes for a missing directory and a missing file.
const RCLONE_DIR_NOT_FOUND: i32 = 3;
const RCLONE_FILE_NOT_FOUND: i32 = 4;

/// Interprets an `rclone lsf` run on a single object. Only a clean "not found"
/// means absent; any other failure is an error.
pub fn lookup_outcome(code: Option<i32>, stdout: &str, stderr: &str) -> Result<bool> {
    match code {
        Some(0) => Ok(!stdout.trim().is_empty()),
        Some(RCLONE_DIR_NOT_FOUND) | Some(RCLONE_FILE_NOT_FOUND) => Ok(false),
        _ if stderr.to_ascii_lowercase().contains("not found") => Ok(false),
        _ => Err(VaultError::message(format!(
            "exit {}: {}",
            code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()),
            stderr.trim()
        ))),
    }
}

/// Splits `remote:path/file` into its directory and file name.
pub fn split_remote(spec: &str) -> Result<(String, String)> {
    let (remote, path) = spec
        .split_once(':')
        .ok_or_else(|| VaultError::message(format!("not a remote path: {}", spec)))?;
    if remote.is_empty() {
        return Err(VaultError::message(format!("not a remote path: {}", spec)));
    }
    let path = path.trim_end_matches('/');
    let (dir, name) = match path.rsplit_once('/') {
        Some((dir, name)) => (format!("{}:{}", remote, dir), name.to_string()),
        None => (format!("{}:", remote), path.to_string()),
    };
    if name.is_empty() {
        return Err(VaultError::message(format!("remote path names no file: {}", spec)));
    }
    Ok((dir, name))
}

pub struct RemoteSync<'a> {
    store: &'a dyn RemoteStore,
    clock: &'a dyn Clock,
    policy: RetryPolicy,
}

impl<'a> RemoteSync<'a> {
    pub fn new(store: &'a dyn RemoteStore, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            clock,
            policy: RetryPolicy::exponential(TRANSFER_ATTEMPTS, TRANSFER_BACKOFF),
        }
    }

    fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        self.policy
            .run(self.clock, &format!("upload {}", remote), |_| {
                self.store.upload(local, remote)
            })
    }

    /// Pushes the archive, its checksum and the ledger.
    pub fn push(&self, target: &RemoteTarget, archive: &Path, ledger: &Path) -> Result<()> {
        let mut files = vec![archive.to_path_buf(), checksum_path(archive)];
        if ledger.exists() {
            files.push(ledger.to_path_buf());
        }
        for file in files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| VaultError::message(format!("no file name: {}", file.display())))?;
            let object = target.object(&name);
            self.upload(&file, &object)?;
            tracing::info!("uploaded {}", object);
        }
        Ok(())
    }

    /// Downloads `spec` into `dest_dir`. When a companion checksum exists remotely,
    /// the download is verified and removed again on mismatch.
    pub fn pull(&self, spec: &str, dest_dir: &Path) -> Result<PathBuf> {
        let (_, name) = split_remote(spec)?;
        let local = dest_dir.join(&name);
        self.policy
            .run(self.clock, &format!("download {}", spec), |_| {
                self.store.download(spec, &local)
            })?;
        tracing::info!("downloaded {} to {}", spec, local.display());

        let remote_sum = format!("{}{}", spec, CHECKSUM_SUFFIX);
        let published = self
            .policy
            .run(self.clock, &format!("lookup {}", remote_sum), |_| {
                self.store.exists(&remote_sum)
            });
        let published = match published {
            Ok(published) => published,
            Err(err) => {
                remove_if_exists(&local)?;
                return Err(VaultError::message(format!(
                    "cannot tell whether {} is published: {}",
                    remote_sum, err
                )));
            }
        };
        if !published {
            tracing::warn!("no checksum published for {}; not verified", spec);
            return Ok(local);
        }
        let local_sum = checksum_path(&local);
        self.policy
            .run(self.clock, &format!("download {}", remote_sum), |_| {
                self.store.download(&remote_sum, &local_sum)
            })?;
        let expected = fs::read_to_string(&local_sum)
            .ok()
            .and_then(|c| parse_checksum(&c));
        remove_if_exists(&local_sum)?;
        let Some(expected) = expected else {
            remove_if_exists(&local)?;
            return Err(VaultError::message(format!("unreadable checksum file {}", remote_sum)));
        };
        let actual = sha256_file(&local)?;
        if actual != expected {
            remove_if_exists(&local)?;
            return Err(VaultError::message(format!(
                "checksum mismatch for {}: expected {}, got {}",
                name, expected, actual
            )));
        }
        tracing::info!("checksum verified for {}", name);
        Ok(local)
    }

    /// Deletes remote archives and checksums older than the target's retention.
    pub fn prune(&self, target: &RemoteTarget) -> Result<Vec<String>> {
        let names = self
            .store
            .list(&target.root(), Some(target.retention_days))?;
        let mut removed = Vec::new();
        for name in names {
            let archive = name.strip_suffix(CHECKSUM_SUFFIX).unwrap_or(&name);
            if !is_archive_file(archive) {
                continue;
            }
            self.store.delete(&target.object(&name))?;
            tracing::info!("pruned remote {}", name);
            removed.push(name);
        }
        Ok(removed)
    }
}
