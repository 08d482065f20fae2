//! Drift detection against the snapshot store.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use crate::config::model::RuntimeConfig;
use crate::error::{Result, VaultError};
use crate::runtime::Runtime;
use crate::snapshot::rsync::{parse_itemized, RsyncMode};
use crate::snapshot::SnapshotStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    /// No snapshot store existed when detection started.
    pub bootstrapped: bool,
    /// Sources found to differ. Detection stops at the first one.
    pub changed: Vec<String>,
}

impl DriftReport {
    pub fn has_drift(&self) -> bool {
        !self.changed.is_empty()
    }
}

pub struct DriftDetector<'a> {
    cfg: &'a RuntimeConfig,
    runtime: &'a dyn Runtime,
    store: SnapshotStore<'a>,
}

impl<'a> DriftDetector<'a> {
    pub fn new(cfg: &'a RuntimeConfig, runtime: &'a dyn Runtime) -> Self {
        Self {
            cfg,
            runtime,
            store: SnapshotStore::new(cfg, runtime),
        }
    }

    pub fn has_changed(&self) -> Result<bool> {
        let report = self.detect()?;
        Ok(report.bootstrapped || report.has_drift())
    }

    pub fn detect(&self) -> Result<DriftReport> {
        self.scan(true)
    }

    /// Same comparison without creating any baseline; a missing baseline counts
    /// as bootstrap (store) or drift (single volume).
    pub fn preview(&self) -> Result<DriftReport> {
        self.scan(false)
    }

    fn scan(&self, create_baselines: bool) -> Result<DriftReport> {
        for volume in &self.cfg.volumes {
            if !self.runtime.volume_exists(volume)? {
                return Err(VaultError::precondition(format!(
                    "protected volume {} does not exist",
                    volume
                )));
            }
        }

        if !self.store.exists() {
            if create_baselines {
                self.store.initialize()?;
            }
            return Ok(DriftReport {
                bootstrapped: true,
                changed: Vec::new(),
            });
        }

        for volume in &self.cfg.volumes {
            if !self.store.volume_dir(volume).is_dir() {
                if !create_baselines {
                    return Ok(DriftReport {
                        bootstrapped: false,
                        changed: vec![format!("volume:{}", volume)],
                    });
                }
                tracing::warn!("no snapshot baseline for volume {}; creating one", volume);
                self.store.mirror_volume(volume)?;
                continue;
            }
            let output = self.store.rsync_volume(volume, RsyncMode::DryRun)?;
            let changed = parse_itemized(&output);
            if let Some(first) = changed.first() {
                tracing::info!(
                    "volume {} changed ({} entries, first: {})",
                    volume,
                    changed.len(),
                    first
                );
                return Ok(DriftReport {
                    bootstrapped: false,
                    changed: vec![format!("volume:{}", volume)],
                });
            }
            tracing::debug!("volume {} unchanged", volume);
        }

        for (live, _) in self.cfg.config_files() {
            if !live.exists() {
                continue;
            }
            let copy = self.store.config_copy(&live);
            if file_differs(&live, &copy)? {
                tracing::info!("config file {} changed", live.display());
                return Ok(DriftReport {
                    bootstrapped: false,
                    changed: vec![format!("config:{}", live.display())],
                });
            }
        }

        Ok(DriftReport::default())
    }
}

fn stamp(path: &Path) -> Result<Option<(u64, SystemTime)>> {
    match fs::metadata(path) {
        Ok(meta) => {
            let modified = meta
                .modified()
                .map_err(|e| VaultError::message(format!("mtime {}: {}", path.display(), e)))?;
            Ok(Some((meta.len(), modified)))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(VaultError::message(format!(
            "stat {}: {}",
            path.display(),
            err
        ))),
    }
}

/// Size and mtime comparison, the same test rsync applies to volume content.
fn file_differs(live: &Path, copy: &Path) -> Result<bool> {
    let live = stamp(live)?;
    let copy = stamp(copy)?;
    Ok(live != copy)
}
