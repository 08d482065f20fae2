use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::model::{
    Config, EnvKeys, HealthSettings, NotifySettings, RemoteConfig, RemoteTarget, RuntimeConfig,
};
use crate::error::{ConfigError, Result, VaultError};
use crate::util::paths::is_safe_name;

pub const CONFIG_FILE: &str = "/etc/stackvault.yaml";

const DEFAULT_STACK_DIR: &str = "/opt/stack";
const DEFAULT_ENV_FILE: &str = ".env";
const DEFAULT_COMPOSE_FILE: &str = "docker-compose.yml";
const DEFAULT_VOLUMES: [&str; 3] = ["app-data", "db-data", "certs"];
const DEFAULT_DATABASE_VOLUME: &str = "db-data";
const DEFAULT_DATABASE_SERVICE: &str = "db";
const DEFAULT_BACKUP_DIR: &str = "/var/backups/stackvault";
const DEFAULT_SNAPSHOT_DIR: &str = "/var/lib/stackvault/snapshot";
const DEFAULT_LOG_DIR: &str = "/var/log/stackvault";
const DEFAULT_RETENTION_DAYS: u32 = 7;
const DEFAULT_REMOTE_RETENTION_DAYS: u32 = 30;
const DEFAULT_HELPER_IMAGE: &str = "alpine:3";
const DEFAULT_RSYNC_IMAGE: &str = "eeacms/rsync:latest";
pub const DEFAULT_EXCLUDES: [&str; 4] = ["pg_wal/*", "pg_stat_tmp/*", "pg_replslot/*", "pg_logical/*"];
const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub stack_dir: Option<PathBuf>,
    pub email: Option<String>,
    pub remote: Option<String>,
    pub remote_path: Option<String>,
    pub notify_on_success: bool,
}

/// Loads `path`; the default config path may be absent, in which case built-in
/// defaults apply. An explicitly requested file must exist.
pub fn load_config(path: &Path, explicit: bool, overrides: &Overrides) -> Result<RuntimeConfig> {
    let cfg = if path.exists() || explicit {
        read_config(path)?
    } else {
        Config::default()
    };
    parse_runtime(apply_overrides(cfg, overrides)?)
}

pub fn read_config(path: &Path) -> Result<Config> {
    let mut contents = String::new();
    File::open(path)
        .map_err(|e| VaultError::message(format!("open {}: {}", path.display(), e)))?
        .read_to_string(&mut contents)
        .map_err(VaultError::Io)?;
    parse_config_str(&contents)
}

pub fn parse_config_str(contents: &str) -> Result<Config> {
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config =
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
    Ok(cfg)
}

fn apply_overrides(mut cfg: Config, overrides: &Overrides) -> Result<Config> {
    if let Some(dir) = &overrides.stack_dir {
        cfg.stack_dir = Some(dir.to_string_lossy().to_string());
    }
    if let Some(email) = &overrides.email {
        cfg.notify.email = Some(email.clone());
    }
    if overrides.notify_on_success {
        cfg.notify.on_success = Some(true);
    }
    if let Some(remote) = &overrides.remote {
        let (name, inline_path) = match remote.split_once(':') {
            Some((name, path)) => (name.to_string(), Some(path.to_string())),
            None => (remote.clone(), None),
        };
        let path = overrides
            .remote_path
            .clone()
            .or(inline_path)
            .or_else(|| cfg.remote.as_ref().map(|r| r.path.clone()))
            .unwrap_or_default();
        let retention_days = cfg.remote.as_ref().and_then(|r| r.retention_days);
        cfg.remote = Some(RemoteConfig {
            name,
            path,
            retention_days,
        });
    } else if let Some(path) = &overrides.remote_path {
        match cfg.remote.as_mut() {
            Some(remote) => remote.path = path.clone(),
            None => {
                return Err(ConfigError::Invalid(
                    "--remote-path requires --remote or a remote in the config file".to_string(),
                )
                .into())
            }
        }
    }
    Ok(cfg)
}

fn parse_runtime(cfg: Config) -> Result<RuntimeConfig> {
    let stack_dir = PathBuf::from(cfg.stack_dir.unwrap_or_else(|| DEFAULT_STACK_DIR.to_string()));
    if stack_dir.as_os_str().is_empty() {
        return Err(ConfigError::Invalid("stackDir is empty".to_string()).into());
    }
    let env_file = stack_dir.join(cfg.env_file.unwrap_or_else(|| DEFAULT_ENV_FILE.to_string()));
    let compose_file =
        stack_dir.join(cfg.compose_file.unwrap_or_else(|| DEFAULT_COMPOSE_FILE.to_string()));

    let volumes = if cfg.volumes.is_empty() {
        DEFAULT_VOLUMES.iter().map(|v| v.to_string()).collect::<Vec<_>>()
    } else {
        cfg.volumes
    };
    let mut names = HashSet::new();
    for volume in &volumes {
        if !is_safe_name(volume) {
            return Err(ConfigError::Invalid(format!(
                "volume {} name must use only letters, digits, '.', '-', '_'",
                volume
            ))
            .into());
        }
        if !names.insert(volume.clone()) {
            return Err(ConfigError::Invalid(format!("duplicate volume {}", volume)).into());
        }
    }
    let database_volume = cfg
        .database_volume
        .unwrap_or_else(|| DEFAULT_DATABASE_VOLUME.to_string());
    if !names.contains(&database_volume) {
        return Err(ConfigError::Invalid(format!(
            "databaseVolume {} is not listed in volumes",
            database_volume
        ))
        .into());
    }
    let database_service = cfg
        .database_service
        .unwrap_or_else(|| DEFAULT_DATABASE_SERVICE.to_string());
    if database_service.trim().is_empty() {
        return Err(ConfigError::Invalid("databaseService is empty".to_string()).into());
    }

    let retention_days = cfg.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS);
    if retention_days == 0 {
        return Err(ConfigError::Invalid("retentionDays must be at least 1".to_string()).into());
    }

    let excludes = if cfg.excludes.is_empty() {
        DEFAULT_EXCLUDES.iter().map(|e| e.to_string()).collect()
    } else {
        cfg.excludes
    };

    let remote = match cfg.remote {
        Some(remote) => {
            if remote.name.trim().is_empty() {
                return Err(ConfigError::Invalid("remote name is empty".to_string()).into());
            }
            Some(RemoteTarget {
                remote: remote.name,
                path: remote.path,
                retention_days: remote
                    .retention_days
                    .unwrap_or(DEFAULT_REMOTE_RETENTION_DAYS),
            })
        }
        None => None,
    };

    let health = HealthSettings {
        timeout: Duration::from_secs(cfg.health.timeout_secs.unwrap_or(180)),
        interval: Duration::from_secs(cfg.health.interval_secs.unwrap_or(5)),
        https_attempts: cfg.health.https_attempts.unwrap_or(5).max(1),
        https_backoff: Duration::from_secs(cfg.health.https_backoff_secs.unwrap_or(10)),
        expiry_warning_days: cfg.health.expiry_warning_days.unwrap_or(30),
    };
    if health.interval.is_zero() {
        return Err(ConfigError::Invalid("health.intervalSecs must be at least 1".to_string()).into());
    }

    let notify = NotifySettings {
        email: cfg.notify.email.filter(|e| !e.trim().is_empty()),
        on_success: cfg.notify.on_success.unwrap_or(false),
        max_attachment_bytes: cfg
            .notify
            .max_attachment_bytes
            .unwrap_or(DEFAULT_MAX_ATTACHMENT_BYTES),
    };

    let env_keys = EnvKeys {
        encryption_key: cfg
            .env
            .encryption_key
            .unwrap_or_else(|| "ENCRYPTION_KEY".to_string()),
        domain: cfg.env.domain.unwrap_or_else(|| "DOMAIN".to_string()),
        db_user: cfg.env.db_user.unwrap_or_else(|| "POSTGRES_USER".to_string()),
        db_name: cfg.env.db_name.unwrap_or_else(|| "POSTGRES_DB".to_string()),
        app_version: cfg
            .env
            .app_version
            .unwrap_or_else(|| "APP_VERSION".to_string()),
    };

    Ok(RuntimeConfig {
        stack_dir,
        env_file,
        compose_file,
        volumes,
        database_volume,
        database_service,
        services: cfg.services,
        backup_dir: PathBuf::from(cfg.backup_dir.unwrap_or_else(|| DEFAULT_BACKUP_DIR.to_string())),
        snapshot_dir: PathBuf::from(
            cfg.snapshot_dir
                .unwrap_or_else(|| DEFAULT_SNAPSHOT_DIR.to_string()),
        ),
        log_dir: PathBuf::from(cfg.log_dir.unwrap_or_else(|| DEFAULT_LOG_DIR.to_string())),
        retention_days,
        excludes,
        helper_image: cfg
            .helper_image
            .unwrap_or_else(|| DEFAULT_HELPER_IMAGE.to_string()),
        rsync_image: cfg
            .rsync_image
            .unwrap_or_else(|| DEFAULT_RSYNC_IMAGE.to_string()),
        remote,
        health,
        notify,
        env_keys,
    })
}

#[cfg(test)]
pub(crate) fn runtime_from_str(yaml: &str) -> Result<RuntimeConfig> {
    parse_runtime(parse_config_str(yaml)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_config_with_volumes_and_remote() {
        let mut file = NamedTempFile::new().expect("tempfile");
        let yaml = r#"
stackDir: "/srv/app"
volumes: ["app-data", "db-data", "certs"]
databaseVolume: "db-data"
databaseService: "postgres"
retentionDays: 3
remote:
  name: "offsite"
  path: "backups/app"
notify:
  email: "ops@example.com"
"#;
        file.write_all(yaml.as_bytes()).expect("write");
        let cfg = load_config(file.path(), true, &Overrides::default()).expect("load");
        assert_eq!(cfg.env_file, PathBuf::from("/srv/app/.env"));
        assert_eq!(cfg.compose_file, PathBuf::from("/srv/app/docker-compose.yml"));
        assert_eq!(cfg.database_service, "postgres");
        assert_eq!(cfg.retention_days, 3);
        let remote = cfg.remote.expect("remote");
        assert_eq!(remote.object("a.tar.gz"), "offsite:backups/app/a.tar.gz");
        assert_eq!(remote.retention_days, DEFAULT_REMOTE_RETENTION_DAYS);
        assert_eq!(cfg.excludes.len(), DEFAULT_EXCLUDES.len());
    }

    #[test]
    fn missing_default_file_uses_defaults() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let cfg = load_config(&dir.path().join("absent.yaml"), false, &Overrides::default())
            .expect("defaults");
        assert_eq!(cfg.volumes, vec!["app-data", "db-data", "certs"]);
        assert!(cfg.remote.is_none());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        assert!(load_config(&dir.path().join("absent.yaml"), true, &Overrides::default()).is_err());
    }

    #[test]
    fn database_volume_must_be_protected() {
        let err = runtime_from_str("volumes: [\"app-data\"]\ndatabaseVolume: \"db-data\"\n")
            .expect_err("invalid");
        assert!(err.to_string().contains("not listed"));
    }

    #[test]
    fn overrides_take_precedence() {
        let cfg = Config::default();
        let overrides = Overrides {
            stack_dir: Some(PathBuf::from("/tmp/stack")),
            email: Some("me@example.com".to_string()),
            remote: Some("gdrive:nightly".to_string()),
            remote_path: None,
            notify_on_success: true,
        };
        let runtime = parse_runtime(apply_overrides(cfg, &overrides).expect("apply")).expect("parse");
        assert_eq!(runtime.stack_dir, PathBuf::from("/tmp/stack"));
        assert_eq!(runtime.notify.email.as_deref(), Some("me@example.com"));
        assert!(runtime.notify.on_success);
        let remote = runtime.remote.expect("remote");
        assert_eq!(remote.remote, "gdrive");
        assert_eq!(remote.path, "nightly");
    }
}
