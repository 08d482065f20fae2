//! Archive assembly: per-volume tarballs, a database dump and the two config
//! files, bundled into one checksummed `backup_<version>_<ts>.tar.gz`.

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

use crate::backup::database::DatabaseTarget;
use crate::config::env::StackEnv;
use crate::config::model::RuntimeConfig;
use crate::error::{Result, VaultError};
use crate::runtime::{HelperMount, Runtime};
use crate::types::BackupStep;
use crate::util::paths::{copy_preserving_mtime, ensure_dir, list_entries};
use crate::util::workdir::{FileGuard, WorkDir};

pub const ENV_BACKUP: &str = ".env.bak";
pub const COMPOSE_BACKUP: &str = "docker-compose.yml.bak";
pub const ARCHIVE_PREFIX: &str = "backup_";
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";
pub const CHECKSUM_SUFFIX: &str = ".sha256";
pub const WORK_PREFIX: &str = "work";

const VOLUME_MOUNT: &str = "/volume";
const BACKUP_MOUNT: &str = "/backup";

pub fn timestamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

pub fn archive_name(app_version: &str, stamp: &str) -> String {
    format!("{}{}_{}{}", ARCHIVE_PREFIX, app_version, stamp, ARCHIVE_SUFFIX)
}

pub fn volume_tarball_name(volume: &str, stamp: &str) -> String {
    format!("volume_{}_{}.tar.gz", volume, stamp)
}

/// Volume name encoded in a `volume_<name>_<ts>.tar.gz` file name.
pub fn volume_from_tarball(file_name: &str) -> Option<&str> {
    let rest = file_name.strip_prefix("volume_")?.strip_suffix(".tar.gz")?;
    // <name>_<YYYYmmdd>_<HHMMSS>
    let mut parts = rest.rsplitn(3, '_');
    let time = parts.next()?;
    let date = parts.next()?;
    let name = parts.next()?;
    let numeric = |s: &str, len: usize| s.len() == len && s.chars().all(|c| c.is_ascii_digit());
    if !numeric(date, 8) || !numeric(time, 6) || name.is_empty() {
        return None;
    }
    Some(name)
}

pub fn is_dump_file(file_name: &str) -> bool {
    file_name.contains("_dump_") && (file_name.ends_with(".sql") || file_name.ends_with(".dump"))
}

pub fn is_archive_file(file_name: &str) -> bool {
    file_name.starts_with(ARCHIVE_PREFIX) && file_name.ends_with(ARCHIVE_SUFFIX)
}

pub fn checksum_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(CHECKSUM_SUFFIX);
    PathBuf::from(name)
}

#[derive(Debug, Clone)]
pub struct BackupArchive {
    pub name: String,
    pub path: PathBuf,
    pub checksum_path: PathBuf,
    pub created_at: DateTime<Local>,
    pub app_version: String,
    pub checksum: String,
    pub parts: Vec<String>,
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path)
        .map_err(|e| VaultError::message(format!("open {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)
        .map_err(|e| VaultError::message(format!("read {}: {}", path.display(), e)))?;
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

/// Writes `<hex>  <file name>` the way `sha256sum` does.
pub fn write_checksum(archive: &Path, checksum: &str) -> Result<PathBuf> {
    let path = checksum_path(archive);
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut file = File::create(&path)
        .map_err(|e| VaultError::message(format!("create {}: {}", path.display(), e)))?;
    writeln!(file, "{}  {}", checksum, name)
        .map_err(|e| VaultError::message(format!("write {}: {}", path.display(), e)))?;
    Ok(path)
}

/// First field of a `sha256sum` line.
pub fn parse_checksum(contents: &str) -> Option<String> {
    let hex = contents.split_whitespace().next()?;
    if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hex.to_ascii_lowercase())
    } else {
        None
    }
}

pub struct ArchiveBuilder<'a> {
    cfg: &'a RuntimeConfig,
    runtime: &'a dyn Runtime,
    env: &'a StackEnv,
}

impl<'a> ArchiveBuilder<'a> {
    pub fn new(cfg: &'a RuntimeConfig, runtime: &'a dyn Runtime, env: &'a StackEnv) -> Self {
        Self { cfg, runtime, env }
    }

    pub fn build(&self, now: DateTime<Local>) -> Result<BackupArchive> {
        let stamp = timestamp(now);
        let app_version = self.env.app_version(&self.cfg.env_keys);
        ensure_dir(&self.cfg.backup_dir).map_err(|e| e.at_step(BackupStep::Package))?;
        let work = WorkDir::create(&self.cfg.backup_dir, WORK_PREFIX, &stamp)
            .map_err(|e| e.at_step(BackupStep::Volumes))?;

        self.capture_volumes(work.path(), &stamp)
            .map_err(|e| e.at_step(BackupStep::Volumes))?;
        self.dump_database(work.path(), &stamp)
            .map_err(|e| e.at_step(BackupStep::DatabaseDump))?;
        self.copy_config(work.path())
            .map_err(|e| e.at_step(BackupStep::Config))?;

        let name = archive_name(&app_version, &stamp);
        let path = self.cfg.backup_dir.join(&name);
        let (parts, checksum, checksum_path) = self
            .package(work.path(), &path)
            .map_err(|e| e.at_step(BackupStep::Package))?;
        drop(work);

        tracing::info!("archive {} written ({} parts)", path.display(), parts.len());
        Ok(BackupArchive {
            name,
            path,
            checksum_path,
            created_at: now,
            app_version,
            checksum,
            parts,
        })
    }

    fn capture_volumes(&self, work: &Path, stamp: &str) -> Result<()> {
        for volume in &self.cfg.volumes {
            if !self.runtime.volume_exists(volume)? {
                return Err(VaultError::message(format!("volume {} does not exist", volume)));
            }
            let file = volume_tarball_name(volume, stamp);
            let mounts = [
                HelperMount::volume(volume, VOLUME_MOUNT, true),
                HelperMount::host(work, BACKUP_MOUNT, false),
            ];
            let command = vec![
                "tar".to_string(),
                "czf".to_string(),
                format!("{}/{}", BACKUP_MOUNT, file),
                "-C".to_string(),
                VOLUME_MOUNT.to_string(),
                ".".to_string(),
            ];
            let output = self
                .runtime
                .run_helper(&self.cfg.helper_image, &mounts, &command)?;
            if !output.success() {
                return Err(VaultError::message(format!(
                    "tar of volume {} exited {}: {}",
                    volume,
                    output.code,
                    output.stderr.trim()
                )));
            }
            if !work.join(&file).is_file() {
                return Err(VaultError::message(format!(
                    "tar of volume {} produced no {}",
                    volume, file
                )));
            }
            tracing::info!("volume {} captured", volume);
        }
        Ok(())
    }

    fn dump_database(&self, work: &Path, stamp: &str) -> Result<()> {
        let db = DatabaseTarget::resolve(&self.cfg.database_service, self.env, &self.cfg.env_keys);
        let output = work.join(db.dump_file_name(stamp));
        db.dump_to(self.runtime, &output)
    }

    fn copy_config(&self, work: &Path) -> Result<()> {
        for (live, name) in self.cfg.config_files() {
            if !live.is_file() {
                return Err(VaultError::message(format!("{} not found", live.display())));
            }
            copy_preserving_mtime(&live, &work.join(name))?;
        }
        Ok(())
    }

    /// Bundles every file in `work` at the archive root and writes the checksum file.
    /// An existing archive of the same name is never overwritten; a partially
    /// written one is removed.
    fn package(&self, work: &Path, path: &Path) -> Result<(Vec<String>, String, PathBuf)> {
        let parts = list_entries(work)?;
        let file = File::options()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| VaultError::message(format!("create {}: {}", path.display(), e)))?;
        let guard = FileGuard::new(path.to_path_buf());
        let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for part in &parts {
            tar.append_path_with_name(work.join(part), part)
                .map_err(|e| VaultError::message(format!("add {}: {}", part, e)))?;
        }
        let encoder = tar
            .into_inner()
            .map_err(|e| VaultError::message(format!("finish {}: {}", path.display(), e)))?;
        let file = encoder
            .finish()
            .map_err(|e| VaultError::message(format!("compress {}: {}", path.display(), e)))?;
        file.sync_all()
            .map_err(|e| VaultError::message(format!("sync {}: {}", path.display(), e)))?;

        let checksum = sha256_file(path)?;
        let checksum_path = write_checksum(path, &checksum)?;
        guard.disarm();
        Ok((parts, checksum, checksum_path))
    }
}

/// Names of the members at the root of an archive, read without extracting.
pub fn list_archive(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)
        .map_err(|e| VaultError::message(format!("open {}: {}", path.display(), e)))?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    let mut names = Vec::new();
    let entries = archive
        .entries()
        .map_err(|e| VaultError::message(format!("read {}: {}", path.display(), e)))?;
    for entry in entries {
        let entry = entry.map_err(|e| VaultError::message(format!("read {}: {}", path.display(), e)))?;
        let name = entry
            .path()
            .map_err(|e| VaultError::message(format!("read {}: {}", path.display(), e)))?
            .to_string_lossy()
            .to_string();
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Unpacks `archive` into `dest`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)
        .map_err(|e| VaultError::message(format!("open {}: {}", archive.display(), e)))?;
    let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));
    tar.unpack(dest)
        .map_err(|e| VaultError::message(format!("extract {}: {}", archive.display(), e)))
}

/// Removes a file if present; used for archives left behind by failed transfers.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(VaultError::message(format!(
            "remove {}: {}",
            path.display(),
            err
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{local_time, test_env, FakeRuntime};

    #[test]
    fn names_follow_the_archive_layout() {
        let now = local_time(2025, 3, 14, 2, 30, 5);
        let stamp = timestamp(now);
        assert_eq!(stamp, "20250314_023005");
        assert_eq!(archive_name("1.2.3", &stamp), "backup_1.2.3_20250314_023005.tar.gz");
        assert_eq!(
            volume_from_tarball("volume_app_data_20250314_023005.tar.gz"),
            Some("app_data")
        );
        assert_eq!(volume_from_tarball("volume_db-data.tar.gz"), None);
        assert!(is_dump_file("app_dump_20250314_023005.sql"));
        assert!(is_dump_file("app_dump_20250314_023005.dump"));
        assert!(!is_dump_file("volume_db-data_20250314_023005.tar.gz"));
    }

    #[test]
    fn checksum_line_matches_sha256sum() {
        let env = test_env();
        let path = env.dir.path().join("backup_1_20250101_000000.tar.gz");
        fs::write(&path, b"abc").expect("write");
        let hex = sha256_file(&path).expect("hash");
        assert_eq!(
            hex,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let sum = write_checksum(&path, &hex).expect("write");
        let contents = fs::read_to_string(&sum).expect("read");
        assert_eq!(contents, format!("{}  backup_1_20250101_000000.tar.gz\n", hex));
        assert_eq!(parse_checksum(&contents), Some(hex));
        assert_eq!(parse_checksum("nope  file"), None);
    }

    #[test]
    fn build_contains_every_part() {
        let env = test_env();
        let runtime = FakeRuntime::new(&["app-data", "db-data", "certs"]);
        let stack_env = StackEnv::load(&env.cfg.env_file).expect("env");
        let builder = ArchiveBuilder::new(&env.cfg, &runtime, &stack_env);
        let archive = builder.build(local_time(2025, 3, 14, 2, 30, 5)).expect("build");

        assert_eq!(archive.name, "backup_1.2.3_20250314_023005.tar.gz");
        assert!(archive.checksum_path.exists());
        let members = list_archive(&archive.path).expect("list");
        let tarballs = members.iter().filter(|m| volume_from_tarball(m).is_some()).count();
        let dumps = members.iter().filter(|m| is_dump_file(m)).count();
        assert_eq!(tarballs, 3);
        assert_eq!(dumps, 1);
        assert!(members.contains(&ENV_BACKUP.to_string()));
        assert!(members.contains(&COMPOSE_BACKUP.to_string()));
        assert_eq!(members.len(), 6);
        assert_eq!(sha256_file(&archive.path).expect("hash"), archive.checksum);
    }

    #[test]
    fn empty_dump_fails_at_dump_step_and_leaves_nothing() {
        let env = test_env();
        let runtime = FakeRuntime::new(&["app-data", "db-data", "certs"]);
        runtime.set_dump_contents("");
        let stack_env = StackEnv::load(&env.cfg.env_file).expect("env");
        let builder = ArchiveBuilder::new(&env.cfg, &runtime, &stack_env);
        let err = builder
            .build(local_time(2025, 3, 14, 2, 30, 5))
            .expect_err("empty dump");
        assert!(matches!(
            err,
            VaultError::Backup {
                step: BackupStep::DatabaseDump,
                ..
            }
        ));
        let leftovers = list_entries(&env.cfg.backup_dir).expect("list");
        assert!(leftovers.is_empty(), "{:?}", leftovers);
    }

    #[test]
    fn failed_volume_capture_is_tagged() {
        let env = test_env();
        let runtime = FakeRuntime::new(&["app-data", "db-data", "certs"]);
        runtime.fail_helper_for("certs");
        let stack_env = StackEnv::load(&env.cfg.env_file).expect("env");
        let builder = ArchiveBuilder::new(&env.cfg, &runtime, &stack_env);
        let err = builder
            .build(local_time(2025, 3, 14, 2, 30, 5))
            .expect_err("tar failure");
        assert!(err.to_string().starts_with("backup failed at volumes"));
    }

    #[test]
    fn same_second_build_never_overwrites_an_archive() {
        let env = test_env();
        let runtime = FakeRuntime::new(&["app-data", "db-data", "certs"]);
        let stack_env = StackEnv::load(&env.cfg.env_file).expect("env");
        let builder = ArchiveBuilder::new(&env.cfg, &runtime, &stack_env);
        let now = local_time(2025, 3, 14, 2, 30, 5);
        let first = builder.build(now).expect("first build");
        let bytes = fs::read(&first.path).expect("read");
        let sum = fs::read_to_string(&first.checksum_path).expect("read sum");

        let err = builder.build(now).expect_err("name collision");
        assert!(matches!(
            err,
            VaultError::Backup {
                step: BackupStep::Package,
                ..
            }
        ));
        assert_eq!(fs::read(&first.path).expect("read"), bytes);
        assert_eq!(fs::read_to_string(&first.checksum_path).expect("read sum"), sum);
        assert_eq!(sha256_file(&first.path).expect("hash"), first.checksum);
        let names = list_entries(&env.cfg.backup_dir).expect("list");
        assert_eq!(names.iter().filter(|n| is_archive_file(n)).count(), 1, "{:?}", names);
    }

    #[test]
    fn extract_round_trips_members() {
        let env = test_env();
        let runtime = FakeRuntime::new(&["app-data", "db-data", "certs"]);
        let stack_env = StackEnv::load(&env.cfg.env_file).expect("env");
        let archive = ArchiveBuilder::new(&env.cfg, &runtime, &stack_env)
            .build(local_time(2025, 3, 14, 2, 30, 5))
            .expect("build");
        let dest = env.dir.path().join("extract");
        fs::create_dir_all(&dest).expect("mkdir");
        extract_archive(&archive.path, &dest).expect("extract");
        assert!(dest.join(ENV_BACKUP).is_file());
        assert!(dest.join("volume_db-data_20250314_023005.tar.gz").is_file());
    }
}
