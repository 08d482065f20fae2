//! Container runtime seam. The orchestration code only talks to [`Runtime`];
//! [`docker::DockerCompose`] is the production implementation.

use std::fmt;
use std::path::Path;

use crate::error::Result;

pub mod docker;

pub const STATE_RUNNING: &str = "running";
pub const HEALTH_HEALTHY: &str = "healthy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub name: String,
    /// Runtime state as reported by the engine (`running`, `exited`, `missing`, ...).
    pub state: String,
    /// Health probe status, `None` when the service declares no probe.
    pub health: Option<String>,
}

impl ServiceStatus {
    pub fn missing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: "missing".to_string(),
            health: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == STATE_RUNNING
    }

    /// Running, and healthy if a probe is declared.
    pub fn is_ready(&self) -> bool {
        self.is_running()
            && self
                .health
                .as_deref()
                .map(|h| h == HEALTH_HEALTHY)
                .unwrap_or(true)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.health {
            Some(health) => write!(f, "{} ({}, {})", self.name, self.state, health),
            None => write!(f, "{} ({}, no probe)", self.name, self.state),
        }
    }
}

/// Mount for a short-lived helper container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperMount {
    /// Volume name or absolute host path.
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl HelperMount {
    pub fn volume(name: &str, target: &str, read_only: bool) -> Self {
        Self {
            source: name.to_string(),
            target: target.to_string(),
            read_only,
        }
    }

    pub fn host(path: &Path, target: &str, read_only: bool) -> Self {
        Self {
            source: path.to_string_lossy().to_string(),
            target: target.to_string(),
            read_only,
        }
    }

    pub fn as_arg(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HelperOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl HelperOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

pub trait Runtime: Sync {
    fn list_services(&self) -> Result<Vec<String>>;
    /// Starts the named services, or every service when `names` is empty.
    fn start_services(&self, names: &[String]) -> Result<()>;
    fn stop_services(&self, remove_volumes: bool) -> Result<()>;
    fn service_status(&self, name: &str) -> Result<ServiceStatus>;
    fn exec_in_service(&self, name: &str, command: &[String]) -> Result<Vec<u8>>;
    /// Runs `command` in the service and streams its stdout into `output`.
    fn exec_to_file(&self, name: &str, command: &[String], output: &Path) -> Result<()>;
    /// Runs `command` in the service with `input` as stdin.
    fn exec_with_input(&self, name: &str, command: &[String], input: &Path) -> Result<()>;
    fn volume_exists(&self, name: &str) -> Result<bool>;
    fn create_volume(&self, name: &str) -> Result<()>;
    fn remove_volume(&self, name: &str) -> Result<()>;
    fn run_helper(
        &self,
        image: &str,
        mounts: &[HelperMount],
        command: &[String],
    ) -> Result<HelperOutput>;
}
