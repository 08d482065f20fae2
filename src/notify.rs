use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{Result, VaultError};
use crate::util::command::{command_failure, maybe_print_command};
use crate::types::RunMode;

pub trait Mailer: Sync {
    fn send(&self, to: &str, subject: &str, body: &str, attachment: Option<&Path>) -> Result<()>;
}

/// `mail -s <subject> [-A <file>] <to>` with the body on stdin.
pub struct MailCommand {
    run_mode: RunMode,
}

impl MailCommand {
    pub fn new(run_mode: RunMode) -> Self {
        Self { run_mode }
    }
}

impl Mailer for MailCommand {
    fn send(&self, to: &str, subject: &str, body: &str, attachment: Option<&Path>) -> Result<()> {
        let mut cmd = Command::new("mail");
        cmd.arg("-s").arg(subject);
        if let Some(path) = attachment {
            cmd.arg("-A").arg(path);
        }
        cmd.arg(to);
        maybe_print_command(&cmd, self.run_mode);
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VaultError::message(format!("mail: {}", e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(body.as_bytes())
                .map_err(|e| VaultError::message(format!("mail: {}", e)))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| VaultError::message(format!("mail: {}", e)))?;
        if !output.status.success() {
            return Err(command_failure(&cmd, &output));
        }
        Ok(())
    }
}
