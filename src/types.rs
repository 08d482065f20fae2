use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunMode {
    pub dry_run: bool,
    pub verbose: bool,
}

/// What a backup invocation decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "FORCED")]
    Forced,
    #[serde(rename = "SKIPPED")]
    Skipped,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Normal => "NORMAL",
            Action::Forced => "FORCED",
            Action::Skipped => "SKIPPED",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Action::Normal => "backup (changes detected)",
            Action::Forced => "forced backup (no changes detected)",
            Action::Skipped => "skipped (no changes detected)",
        }
    }

    pub fn runs_backup(&self) -> bool {
        match self {
            Action::Normal | Action::Forced => true,
            Action::Skipped => false,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "SKIPPED")]
    Skipped,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "SUCCESS",
            Status::Fail => "FAIL",
            Status::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Backup,
    Restore,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Backup => "backup",
            Operation::Restore => "restore",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStep {
    HealthGate,
    Volumes,
    DatabaseDump,
    Config,
    Package,
    Cleanup,
}

impl BackupStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStep::HealthGate => "health-gate",
            BackupStep::Volumes => "volumes",
            BackupStep::DatabaseDump => "database-dump",
            BackupStep::Config => "config",
            BackupStep::Package => "package",
            BackupStep::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for BackupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStage {
    Fetch,
    Extract,
    ValidateConfig,
    StopStack,
    PlanDbStrategy,
    RestoreVolumes,
    StartDb,
    ImportDb,
    StartRest,
    HealthGate,
    Cleanup,
}

impl RestoreStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreStage::Fetch => "FETCH",
            RestoreStage::Extract => "EXTRACT",
            RestoreStage::ValidateConfig => "VALIDATE_CONFIG",
            RestoreStage::StopStack => "STOP_STACK",
            RestoreStage::PlanDbStrategy => "PLAN_DB_STRATEGY",
            RestoreStage::RestoreVolumes => "RESTORE_VOLUMES",
            RestoreStage::StartDb => "START_DB",
            RestoreStage::ImportDb => "IMPORT_DB",
            RestoreStage::StartRest => "START_REST",
            RestoreStage::HealthGate => "HEALTH_GATE",
            RestoreStage::Cleanup => "CLEANUP",
        }
    }

    /// Stages after which the live stack has been touched.
    pub fn touches_stack(&self) -> bool {
        match self {
            RestoreStage::Fetch | RestoreStage::Extract | RestoreStage::ValidateConfig => false,
            RestoreStage::StopStack
            | RestoreStage::PlanDbStrategy
            | RestoreStage::RestoreVolumes
            | RestoreStage::StartDb
            | RestoreStage::ImportDb
            | RestoreStage::StartRest
            | RestoreStage::HealthGate
            | RestoreStage::Cleanup => true,
        }
    }
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
