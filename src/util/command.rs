use std::fs::File;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use crate::error::{Result, VaultError};
use crate::types::RunMode;

pub fn format_command(cmd: &Command) -> String {
    let program = cmd.get_program().to_string_lossy();
    let args: Vec<String> = cmd
        .get_args()
        .map(|a| a.to_string_lossy().to_string())
        .collect();
    format!("{} {}", program, args.join(" "))
}

pub fn maybe_print_command(cmd: &Command, run_mode: RunMode) {
    if !run_mode.dry_run && !run_mode.verbose {
        return;
    }
    tracing::debug!("exec: {}", format_command(cmd));
    if run_mode.dry_run {
        println!("{}", format_command(cmd));
    }
}

/// Runs `cmd` capturing stdout and stderr.
pub fn capture_command(cmd: &mut Command, run_mode: RunMode) -> Result<Output> {
    maybe_print_command(cmd, run_mode);
    cmd.stdin(Stdio::null())
        .output()
        .map_err(|e| VaultError::message(format!("{}: {}", cmd.get_program().to_string_lossy(), e)))
}

/// Runs `cmd` and fails unless it exits zero; returns stdout.
pub fn checked_output(cmd: &mut Command, run_mode: RunMode) -> Result<Vec<u8>> {
    let output = capture_command(cmd, run_mode)?;
    if !output.status.success() {
        return Err(command_failure(cmd, &output));
    }
    Ok(output.stdout)
}

/// Runs `cmd` with `input` as stdin; fails unless it exits zero.
pub fn run_with_input(cmd: &mut Command, input: &Path, run_mode: RunMode) -> Result<()> {
    let file = File::open(input)
        .map_err(|e| VaultError::message(format!("open {}: {}", input.display(), e)))?;
    maybe_print_command(cmd, run_mode);
    let output = cmd
        .stdin(Stdio::from(file))
        .output()
        .map_err(|e| VaultError::message(format!("{}: {}", cmd.get_program().to_string_lossy(), e)))?;
    if !output.status.success() {
        return Err(command_failure(cmd, &output));
    }
    Ok(())
}

pub fn command_failure(cmd: &Command, output: &Output) -> VaultError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    VaultError::message(format!(
        "{} failed with exit code {}: {}",
        format_command(cmd),
        output.status.code().unwrap_or(1),
        stderr.trim()
    ))
}
