use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Deserialize;

use crate::error::{Result, VaultError};
use crate::runtime::{HelperMount, HelperOutput, Runtime, ServiceStatus};
use crate::types::RunMode;
use crate::util::command::{
    capture_command, checked_output, command_failure, maybe_print_command, run_with_input,
};

/// `docker compose` for the stack plus plain `docker` for volumes and helpers.
#[derive(Clone)]
pub struct DockerCompose {
    compose_file: PathBuf,
    project_dir: PathBuf,
    run_mode: RunMode,
}

#[derive(Debug, Deserialize)]
struct ContainerState {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Health", default)]
    health: Option<ContainerHealth>,
}

#[derive(Debug, Deserialize)]
struct ContainerHealth {
    #[serde(rename = "Status", default)]
    status: String,
}

impl DockerCompose {
    pub fn new(compose_file: &Path, project_dir: &Path, run_mode: RunMode) -> Self {
        Self {
            compose_file: compose_file.to_path_buf(),
            project_dir: project_dir.to_path_buf(),
            run_mode,
        }
    }

    fn compose(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("compose")
            .arg("-f")
            .arg(&self.compose_file)
            .arg("--project-directory")
            .arg(&self.project_dir);
        cmd
    }

    fn container_id(&self, service: &str) -> Result<Option<String>> {
        let mut cmd = self.compose();
        cmd.arg("ps").arg("-a").arg("-q").arg(service);
        let stdout = checked_output(&mut cmd, self.run_mode)?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .map(|l| l.to_string()))
    }
}

pub fn parse_state(name: &str, json: &str) -> Result<ServiceStatus> {
    let state: ContainerState = serde_json::from_str(json.trim())
        .map_err(|e| VaultError::message(format!("parse state of {}: {}", name, e)))?;
    Ok(ServiceStatus {
        name: name.to_string(),
        state: state.status,
        health: state
            .health
            .map(|h| h.status)
            .filter(|s| !s.is_empty()),
    })
}

impl Runtime for DockerCompose {
    fn list_services(&self) -> Result<Vec<String>> {
        let mut cmd = self.compose();
        cmd.arg("config").arg("--services");
        let stdout = checked_output(&mut cmd, self.run_mode)?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    fn start_services(&self, names: &[String]) -> Result<()> {
        let mut cmd = self.compose();
        cmd.arg("up").arg("-d");
        for name in names {
            cmd.arg(name);
        }
        checked_output(&mut cmd, self.run_mode).map(|_| ())
    }

    fn stop_services(&self, remove_volumes: bool) -> Result<()> {
        let mut cmd = self.compose();
        cmd.arg("down").arg("--remove-orphans");
        if remove_volumes {
            cmd.arg("-v");
        }
        checked_output(&mut cmd, self.run_mode).map(|_| ())
    }

    fn service_status(&self, name: &str) -> Result<ServiceStatus> {
        let Some(id) = self.container_id(name)? else {
            return Ok(ServiceStatus::missing(name));
        };
        let mut cmd = Command::new("docker");
        cmd.arg("inspect").arg("--format").arg("{{json .State}}").arg(&id);
        let stdout = checked_output(&mut cmd, self.run_mode)?;
        parse_state(name, &String::from_utf8_lossy(&stdout))
    }

    fn exec_in_service(&self, name: &str, command: &[String]) -> Result<Vec<u8>> {
        let mut cmd = self.compose();
        cmd.arg("exec").arg("-T").arg(name).args(command);
        checked_output(&mut cmd, self.run_mode)
    }

    fn exec_to_file(&self, name: &str, command: &[String], output: &Path) -> Result<()> {
        let file = File::create(output)
            .map_err(|e| VaultError::message(format!("create {}: {}", output.display(), e)))?;
        let mut cmd = self.compose();
        cmd.arg("exec").arg("-T").arg(name).args(command);
        maybe_print_command(&cmd, self.run_mode);
        let out = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::from(file))
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| VaultError::message(format!("docker: {}", e)))?;
        if !out.status.success() {
            return Err(command_failure(&cmd, &out));
        }
        Ok(())
    }

    fn exec_with_input(&self, name: &str, command: &[String], input: &Path) -> Result<()> {
        let mut cmd = self.compose();
        cmd.arg("exec").arg("-T").arg(name).args(command);
        run_with_input(&mut cmd, input, self.run_mode)
    }

    fn volume_exists(&self, name: &str) -> Result<bool> {
        let mut cmd = Command::new("docker");
        cmd.arg("volume").arg("inspect").arg(name);
        let output = capture_command(&mut cmd, self.run_mode)?;
        Ok(output.status.success())
    }

    fn create_volume(&self, name: &str) -> Result<()> {
        let mut cmd = Command::new("docker");
        cmd.arg("volume").arg("create").arg(name);
        checked_output(&mut cmd, self.run_mode).map(|_| ())
    }

    fn remove_volume(&self, name: &str) -> Result<()> {
        let mut cmd = Command::new("docker");
        cmd.arg("volume").arg("rm").arg("-f").arg(name);
        checked_output(&mut cmd, self.run_mode).map(|_| ())
    }

    fn run_helper(
        &self,
        image: &str,
        mounts: &[HelperMount],
        command: &[String],
    ) -> Result<HelperOutput> {
        let mut cmd = Command::new("docker");
        cmd.arg("run").arg("--rm");
        for mount in mounts {
            cmd.arg("-v").arg(mount.as_arg());
        }
        cmd.arg(image).args(command);
        let output = capture_command(&mut cmd, self.run_mode)?;
        Ok(HelperOutput {
            code: output.status.code().unwrap_or(1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_state_with_probe() {
        let json = r#"{"Status":"running","Running":true,"Health":{"Status":"starting","FailingStreak":0}}"#;
        let status = parse_state("db", json).expect("parse");
        assert!(status.is_running());
        assert!(!status.is_ready());
        assert_eq!(status.health.as_deref(), Some("starting"));
    }

    #[test]
    fn parse_state_without_probe_is_ready_once_running() {
        let status = parse_state("proxy", r#"{"Status":"running"}"#).expect("parse");
        assert!(status.is_ready());
        let status = parse_state("proxy", r#"{"Status":"exited","Health":null}"#).expect("parse");
        assert!(!status.is_ready());
    }

    #[test]
    fn helper_mount_args() {
        assert_eq!(
            HelperMount::volume("db-data", "/volume", true).as_arg(),
            "db-data:/volume:ro"
        );
        assert_eq!(
            HelperMount::host(Path::new("/tmp/w"), "/backup", false).as_arg(),
            "/tmp/w:/backup"
        );
    }
}
