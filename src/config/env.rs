use std::collections::BTreeMap;
use std::path::Path;

use crate::config::model::EnvKeys;
use crate::error::{ConfigError, Result};

const FALLBACK_DB_USER: &str = "postgres";
const FALLBACK_DB_NAME: &str = "postgres";
const FALLBACK_APP_VERSION: &str = "unknown";

/// Values from the stack's `.env` file. Parsed once; the process environment is
/// never modified or consulted.
#[derive(Debug, Clone, Default)]
pub struct StackEnv {
    values: BTreeMap<String, String>,
}

impl StackEnv {
    pub fn load(path: &Path) -> Result<Self> {
        let iter = dotenv::from_path_iter(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        let mut values = BTreeMap::new();
        for item in iter {
            let (key, value) =
                item.map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
            values.insert(key, value);
        }
        Ok(Self { values })
    }

    /// Missing file yields an empty environment; the stack may not be installed yet.
    pub fn load_or_empty(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn db_user(&self, keys: &EnvKeys) -> String {
        self.get(&keys.db_user)
            .unwrap_or(FALLBACK_DB_USER)
            .to_string()
    }

    /// Database name; falls back to the user name the way the postgres image does.
    pub fn db_name(&self, keys: &EnvKeys) -> String {
        self.get(&keys.db_name)
            .or_else(|| self.get(&keys.db_user))
            .unwrap_or(FALLBACK_DB_NAME)
            .to_string()
    }

    pub fn domain(&self, keys: &EnvKeys) -> Option<String> {
        self.get(&keys.domain).map(|d| d.to_string())
    }

    pub fn encryption_key(&self, keys: &EnvKeys) -> Option<&str> {
        self.get(&keys.encryption_key)
    }

    /// Version token safe to embed in archive filenames.
    pub fn app_version(&self, keys: &EnvKeys) -> String {
        let raw = self.get(&keys.app_version).unwrap_or(FALLBACK_APP_VERSION);
        sanitize_version(raw)
    }
}

pub fn sanitize_version(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('-').to_string();
    if cleaned.is_empty() {
        FALLBACK_APP_VERSION.to_string()
    } else {
        cleaned
    }
}
