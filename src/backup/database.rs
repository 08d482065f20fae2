//! PostgreSQL commands run inside the database service.

use std::path::Path;

use crate::config::env::StackEnv;
use crate::config::model::EnvKeys;
use crate::error::{Result, VaultError};
use crate::runtime::Runtime;

const MAINTENANCE_DB: &str = "postgres";
const FALLBACK_MAINTENANCE_DB: &str = "template1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFormat {
    /// Plain SQL, replayed with `psql`.
    Sql,
    /// Custom format, replayed with `pg_restore`.
    Custom,
}

impl DumpFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("sql") => Some(DumpFormat::Sql),
            Some("dump") => Some(DumpFormat::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    pub service: String,
    pub user: String,
    pub name: String,
}

impl DatabaseTarget {
    pub fn resolve(service: &str, env: &StackEnv, keys: &EnvKeys) -> Self {
        Self {
            service: service.to_string(),
            user: env.db_user(keys),
            name: env.db_name(keys),
        }
    }

    pub fn dump_file_name(&self, stamp: &str) -> String {
        format!("{}_dump_{}.sql", self.name, stamp)
    }

    fn args(&self, items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    pub fn readiness_command(&self) -> Vec<String> {
        self.args(&["pg_isready", "-U", &self.user, "-d", &self.name])
    }

    pub fn dump_command(&self) -> Vec<String> {
        self.args(&["pg_dump", "-U", &self.user, "-d", &self.name, "--no-password"])
    }

    /// Database the admin session connects to; never the one being dropped.
    pub fn maintenance_db(&self) -> &'static str {
        if self.name == MAINTENANCE_DB {
            FALLBACK_MAINTENANCE_DB
        } else {
            MAINTENANCE_DB
        }
    }

    fn admin_sql(&self, sql: &str) -> Vec<String> {
        self.args(&[
            "psql",
            "-U",
            &self.user,
            "-d",
            self.maintenance_db(),
            "-v",
            "ON_ERROR_STOP=1",
            "-c",
            sql,
        ])
    }

    pub fn terminate_command(&self) -> Vec<String> {
        self.admin_sql(&format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = '{}' AND pid <> pg_backend_pid();",
            self.name.replace('\'', "''")
        ))
    }

    pub fn drop_command(&self) -> Vec<String> {
        self.admin_sql(&format!(
            "DROP DATABASE IF EXISTS {};",
            quote_ident(&self.name)
        ))
    }

    pub fn create_command(&self) -> Vec<String> {
        self.admin_sql(&format!(
            "CREATE DATABASE {} OWNER {};",
            quote_ident(&self.name),
            quote_ident(&self.user)
        ))
    }

    pub fn import_command(&self, format: DumpFormat) -> Vec<String> {
        match format {
            DumpFormat::Sql => self.args(&[
                "psql",
                "-U",
                &self.user,
                "-d",
                &self.name,
                "-v",
                "ON_ERROR_STOP=1",
            ]),
            DumpFormat::Custom => self.args(&[
                "pg_restore",
                "-U",
                &self.user,
                "-d",
                &self.name,
                "--no-owner",
            ]),
        }
    }

    pub fn is_ready(&self, runtime: &dyn Runtime) -> bool {
        runtime
            .exec_in_service(&self.service, &self.readiness_command())
            .is_ok()
    }

    /// Dumps into `output`; an empty dump is an error.
    pub fn dump_to(&self, runtime: &dyn Runtime, output: &Path) -> Result<()> {
        if !self.is_ready(runtime) {
            return Err(VaultError::message(format!(
                "database {} is not accepting connections",
                self.name
            )));
        }
        runtime.exec_to_file(&self.service, &self.dump_command(), output)?;
        let size = std::fs::metadata(output)
            .map(|m| m.len())
            .map_err(|e| VaultError::message(format!("stat {}: {}", output.display(), e)))?;
        if size == 0 {
            return Err(VaultError::message(format!(
                "database dump {} is empty",
                output.display()
            )));
        }
        tracing::info!("database {} dumped ({} bytes)", self.name, size);
        Ok(())
    }

    /// Drops and recreates the database, then replays `dump` into it.
    pub fn import(&self, runtime: &dyn Runtime, dump: &Path) -> Result<()> {
        let format = DumpFormat::from_path(dump).ok_or_else(|| {
            VaultError::message(format!("unrecognized dump format: {}", dump.display()))
        })?;
        runtime.exec_in_service(&self.service, &self.terminate_command())?;
        runtime.exec_in_service(&self.service, &self.drop_command())?;
        runtime.exec_in_service(&self.service, &self.create_command())?;
        runtime.exec_with_input(&self.service, &self.import_command(format), dump)?;
        tracing::info!("database {} restored from {}", self.name, dump.display());
        Ok(())
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
