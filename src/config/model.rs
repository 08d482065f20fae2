use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default, rename = "stackDir", skip_serializing_if = "Option::is_none")]
    pub stack_dir: Option<String>,
    #[serde(default, rename = "envFile", skip_serializing_if = "Option::is_none")]
    pub env_file: Option<String>,
    #[serde(default, rename = "composeFile", skip_serializing_if = "Option::is_none")]
    pub compose_file: Option<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default, rename = "databaseVolume", skip_serializing_if = "Option::is_none")]
    pub database_volume: Option<String>,
    #[serde(default, rename = "databaseService", skip_serializing_if = "Option::is_none")]
    pub database_service: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    #[serde(default, rename = "backupDir", skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<String>,
    #[serde(default, rename = "snapshotDir", skip_serializing_if = "Option::is_none")]
    pub snapshot_dir: Option<String>,
    #[serde(default, rename = "logDir", skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
    #[serde(default, rename = "retentionDays", skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default, rename = "helperImage", skip_serializing_if = "Option::is_none")]
    pub helper_image: Option<String>,
    #[serde(default, rename = "rsyncImage", skip_serializing_if = "Option::is_none")]
    pub rsync_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub env: EnvKeysConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RemoteConfig {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, rename = "retentionDays", skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct HealthConfig {
    #[serde(default, rename = "timeoutSecs", skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, rename = "intervalSecs", skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    #[serde(default, rename = "httpsAttempts", skip_serializing_if = "Option::is_none")]
    pub https_attempts: Option<u32>,
    #[serde(default, rename = "httpsBackoffSecs", skip_serializing_if = "Option::is_none")]
    pub https_backoff_secs: Option<u64>,
    #[serde(default, rename = "expiryWarningDays", skip_serializing_if = "Option::is_none")]
    pub expiry_warning_days: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct NotifyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, rename = "onSuccess", skip_serializing_if = "Option::is_none")]
    pub on_success: Option<bool>,
    #[serde(default, rename = "maxAttachmentBytes", skip_serializing_if = "Option::is_none")]
    pub max_attachment_bytes: Option<u64>,
}

/// Names of the stack `.env` variables the tool reads.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct EnvKeysConfig {
    #[serde(default, rename = "encryptionKey", skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, rename = "dbUser", skip_serializing_if = "Option::is_none")]
    pub db_user: Option<String>,
    #[serde(default, rename = "dbName", skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    #[serde(default, rename = "appVersion", skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub remote: String,
    pub path: String,
    pub retention_days: u32,
}

impl RemoteTarget {
    /// `remote:path/name` in rclone notation.
    pub fn object(&self, name: &str) -> String {
        let path = self.path.trim_matches('/');
        if path.is_empty() {
            format!("{}:{}", self.remote, name)
        } else {
            format!("{}:{}/{}", self.remote, path, name)
        }
    }

    pub fn root(&self) -> String {
        format!("{}:{}", self.remote, self.path.trim_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub timeout: Duration,
    pub interval: Duration,
    pub https_attempts: u32,
    pub https_backoff: Duration,
    pub expiry_warning_days: i64,
}

#[derive(Debug, Clone)]
pub struct NotifySettings {
    pub email: Option<String>,
    pub on_success: bool,
    pub max_attachment_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct EnvKeys {
    pub encryption_key: String,
    pub domain: String,
    pub db_user: String,
    pub db_name: String,
    pub app_version: String,
}

/// Validated configuration. Built once per run and passed by reference.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub stack_dir: PathBuf,
    pub env_file: PathBuf,
    pub compose_file: PathBuf,
    pub volumes: Vec<String>,
    pub database_volume: String,
    pub database_service: String,
    pub services: Vec<String>,
    pub backup_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub log_dir: PathBuf,
    pub retention_days: u32,
    pub excludes: Vec<String>,
    pub helper_image: String,
    pub rsync_image: String,
    pub remote: Option<RemoteTarget>,
    pub health: HealthSettings,
    pub notify: NotifySettings,
    pub env_keys: EnvKeys,
}

impl RuntimeConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.backup_dir.join(crate::ledger::LEDGER_FILE)
    }

    /// The two stack configuration files with the names they carry inside an archive.
    pub fn config_files(&self) -> [(PathBuf, &'static str); 2] {
        [
            (self.env_file.clone(), crate::backup::archive::ENV_BACKUP),
            (self.compose_file.clone(), crate::backup::archive::COMPOSE_BACKUP),
        ]
    }
}
