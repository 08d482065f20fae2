//! Snapshot store: the last-known-good mirror of every protected volume and the
//! two stack config files.
//!
//! Layout: `<snapshotDir>/volumes/<volume>/` and `<snapshotDir>/config/<file>`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::RuntimeConfig;
use crate::error::{Result, VaultError};
use crate::runtime::{HelperMount, Runtime};
use crate::util::paths::{copy_preserving_mtime, ensure_dir, list_entries};

pub mod rsync;

use rsync::{rsync_args, rsync_ok, RsyncMode, SNAPSHOT_MOUNT, SOURCE_MOUNT};

pub struct SnapshotStore<'a> {
    cfg: &'a RuntimeConfig,
    runtime: &'a dyn Runtime,
}

impl<'a> SnapshotStore<'a> {
    pub fn new(cfg: &'a RuntimeConfig, runtime: &'a dyn Runtime) -> Self {
        Self { cfg, runtime }
    }

    pub fn root(&self) -> &Path {
        &self.cfg.snapshot_dir
    }

    pub fn exists(&self) -> bool {
        self.root().is_dir()
    }

    pub fn volumes_dir(&self) -> PathBuf {
        self.root().join("volumes")
    }

    pub fn volume_dir(&self, volume: &str) -> PathBuf {
        self.volumes_dir().join(volume)
    }

    /// Snapshot copy of a live config file, stored under its own file name.
    pub fn config_copy(&self, live: &Path) -> PathBuf {
        let name = live
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "config".to_string());
        self.root().join("config").join(name)
    }

    /// Runs rsync in a helper container with the live volume read-only on
    /// `/source` and its snapshot directory on `/snapshot`.
    pub fn rsync_volume(&self, volume: &str, mode: RsyncMode) -> Result<String> {
        if !self.runtime.volume_exists(volume)? {
            return Err(VaultError::precondition(format!(
                "volume {} does not exist",
                volume
            )));
        }
        let dir = self.volume_dir(volume);
        ensure_dir(&dir)?;
        let mounts = [
            HelperMount::volume(volume, SOURCE_MOUNT, true),
            HelperMount::host(&dir, SNAPSHOT_MOUNT, mode == RsyncMode::DryRun),
        ];
        let output = self.runtime.run_helper(
            &self.cfg.rsync_image,
            &mounts,
            &rsync_args(&self.cfg.excludes, mode),
        )?;
        if !rsync_ok(output.code) {
            return Err(VaultError::message(format!(
                "rsync of volume {} failed with exit code {}: {}",
                volume,
                output.code,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    pub fn mirror_volume(&self, volume: &str) -> Result<()> {
        self.rsync_volume(volume, RsyncMode::Mirror)?;
        tracing::debug!("snapshot of volume {} refreshed", volume);
        Ok(())
    }

    /// Copies each config file that exists live; drops copies whose source is gone.
    pub fn mirror_config(&self) -> Result<()> {
        for (live, _) in self.cfg.config_files() {
            let copy = self.config_copy(&live);
            if live.exists() {
                copy_preserving_mtime(&live, &copy)?;
            } else if copy.exists() {
                fs::remove_file(&copy)
                    .map_err(|e| VaultError::message(format!("remove {}: {}", copy.display(), e)))?;
            }
        }
        Ok(())
    }

    /// First-run bootstrap: mirror everything verbatim.
    pub fn initialize(&self) -> Result<()> {
        tracing::info!("initializing snapshot store at {}", self.root().display());
        ensure_dir(&self.volumes_dir())?;
        for volume in &self.cfg.volumes {
            self.mirror_volume(volume)?;
        }
        self.mirror_config()
    }

    /// Post-backup refresh. Every volume is attempted even when an earlier one
    /// fails; failures are reported together at the end.
    pub fn refresh(&self) -> Result<()> {
        ensure_dir(&self.volumes_dir())?;
        let mut failures = Vec::new();
        for volume in &self.cfg.volumes {
            if let Err(err) = self.mirror_volume(volume) {
                tracing::error!("snapshot refresh of {} failed: {}", volume, err);
                failures.push(format!("{}: {}", volume, err));
            }
        }
        if let Err(err) = self.mirror_config() {
            failures.push(format!("config: {}", err));
        }
        if let Err(err) = self.prune_unconfigured() {
            failures.push(format!("prune: {}", err));
        }
        if failures.is_empty() {
            tracing::info!("snapshot store refreshed");
            Ok(())
        } else {
            Err(VaultError::message(format!(
                "snapshot refresh incomplete: {}",
                failures.join("; ")
            )))
        }
    }

    /// Removes snapshot directories of volumes that are no longer protected.
    pub fn prune_unconfigured(&self) -> Result<Vec<String>> {
        let dir = self.volumes_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut removed = Vec::new();
        for name in list_entries(&dir)? {
            if self.cfg.volumes.iter().any(|v| v == &name) {
                continue;
            }
            let path = dir.join(&name);
            fs::remove_dir_all(&path)
                .map_err(|e| VaultError::message(format!("remove {}: {}", path.display(), e)))?;
            tracing::info!("pruned snapshot of unprotected volume {}", name);
            removed.push(name);
        }
        Ok(removed)
    }
}
