use std::io;
use thiserror::Error;

use crate::types::{BackupStep, RestoreStage};

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Config(ConfigError),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("backup failed at {step}: {message}")]
    Backup { step: BackupStep, message: String },
    #[error("restore failed at {stage}: {message}")]
    Restore { stage: RestoreStage, message: String },
    #[error("health gate failed: {0}")]
    Health(String),
    #[error("interrupted")]
    Interrupted,
    #[error("{0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parse config: {0}")]
    Parse(String),
    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;

impl VaultError {
    pub fn message(msg: impl Into<String>) -> Self {
        VaultError::Message(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        VaultError::Precondition(msg.into())
    }

    pub fn backup(step: BackupStep, err: impl std::fmt::Display) -> Self {
        VaultError::Backup {
            step,
            message: err.to_string(),
        }
    }

    pub fn restore(stage: RestoreStage, err: impl std::fmt::Display) -> Self {
        VaultError::Restore {
            stage,
            message: err.to_string(),
        }
    }

    /// Re-tags an error raised by a collaborator with the backup step it happened in.
    /// Precondition and health failures keep their own class.
    pub fn at_step(self, step: BackupStep) -> Self {
        match self {
            VaultError::Backup { .. }
            | VaultError::Precondition(_)
            | VaultError::Health(_)
            | VaultError::Interrupted => self,
            other => VaultError::backup(step, other),
        }
    }

    pub fn at_stage(self, stage: RestoreStage) -> Self {
        match self {
            VaultError::Restore { .. }
            | VaultError::Precondition(_)
            | VaultError::Interrupted => self,
            other => VaultError::restore(stage, other),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            VaultError::Config(_) => 2,
            VaultError::Precondition(_) => 3,
            VaultError::Health(_) => 4,
            VaultError::Restore {
                stage: RestoreStage::HealthGate,
                ..
            } => 4,
            VaultError::Interrupted => 130,
            VaultError::Message(_)
            | VaultError::Backup { .. }
            | VaultError::Restore { .. }
            | VaultError::Io(_) => 1,
        }
    }
}

impl From<ConfigError> for VaultError {
    fn from(err: ConfigError) -> Self {
        VaultError::Config(err)
    }
}
