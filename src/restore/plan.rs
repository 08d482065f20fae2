//! What an extracted archive contains, and which volumes a restore rebuilds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::backup::archive::{is_dump_file, volume_from_tarball, COMPOSE_BACKUP, ENV_BACKUP};
use crate::error::{Result, VaultError};

#[derive(Debug, Clone, Default)]
pub struct ExtractedArchive {
    pub root: PathBuf,
    pub dump: Option<PathBuf>,
    pub tarballs: BTreeMap<String, PathBuf>,
    pub env_backup: Option<PathBuf>,
    pub compose_backup: Option<PathBuf>,
}

impl ExtractedArchive {
    /// Walks the extraction directory. Members are expected at the root, but
    /// archives wrapped in a top-level directory are accepted too.
    pub fn scan(root: &Path) -> Result<Self> {
        let mut found = ExtractedArchive {
            root: root.to_path_buf(),
            ..Default::default()
        };
        for entry in WalkDir::new(root).min_depth(1).max_depth(3) {
            let entry = entry
                .map_err(|e| VaultError::message(format!("scan {}: {}", root.display(), e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry.path().to_path_buf();
            if name == ENV_BACKUP {
                found.env_backup.get_or_insert(path);
            } else if name == COMPOSE_BACKUP {
                found.compose_backup.get_or_insert(path);
            } else if is_dump_file(&name) {
                if let Some(existing) = &found.dump {
                    return Err(VaultError::message(format!(
                        "archive holds more than one database dump: {} and {}",
                        existing.display(),
                        path.display()
                    )));
                }
                found.dump = Some(path);
            } else if let Some(volume) = volume_from_tarball(&name) {
                found.tarballs.insert(volume.to_string(), path);
            }
        }
        Ok(found)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePlan {
    /// Volumes wiped and rebuilt from their tarballs, in configured order.
    pub volumes: Vec<String>,
    /// The database volume when a dump takes its place.
    pub preserved: Option<String>,
    pub dump: Option<PathBuf>,
}

impl RestorePlan {
    /// A dump replaces the database volume tarball; without one every volume,
    /// the database volume included, comes from its tarball.
    pub fn build(volumes: &[String], database_volume: &str, extracted: &ExtractedArchive) -> Self {
        match &extracted.dump {
            Some(dump) => RestorePlan {
                volumes: volumes
                    .iter()
                    .filter(|v| v.as_str() != database_volume)
                    .cloned()
                    .collect(),
                preserved: volumes
                    .iter()
                    .find(|v| v.as_str() == database_volume)
                    .cloned(),
                dump: Some(dump.clone()),
            },
            None => RestorePlan {
                volumes: volumes.to_vec(),
                preserved: None,
                dump: None,
            },
        }
    }

    /// The database must come from somewhere: a dump or its volume tarball.
    pub fn check_database_source(
        &self,
        database_volume: &str,
        extracted: &ExtractedArchive,
    ) -> Result<()> {
        if self.dump.is_some() || extracted.tarballs.contains_key(database_volume) {
            return Ok(());
        }
        Err(VaultError::message(format!(
            "archive has neither a database dump nor a {} tarball",
            database_volume
        )))
    }

    pub fn describe(&self) -> String {
        let mut text = format!("rebuild volumes [{}]", self.volumes.join(", "));
        if let Some(dump) = &self.dump {
            let name = dump
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            text.push_str(&format!("; import {}", name));
        }
        if let Some(volume) = &self.preserved {
            text.push_str(&format!("; keep volume {}", volume));
        }
        text
    }
}
