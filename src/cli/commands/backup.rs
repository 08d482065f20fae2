use std::path::PathBuf;

use chrono::Local;

use crate::backup::{run_backup, BackupOptions};
use crate::cli::args::BackupArgs;
use crate::cli::commands::{finish, Host};
use crate::config::model::RuntimeConfig;
use crate::error::Result;
use crate::report::RunSummary;
use crate::types::{Operation, RunMode};

pub fn run_backup_command(
    cfg: &RuntimeConfig,
    args: &BackupArgs,
    run_mode: RunMode,
    log_file: Option<PathBuf>,
) -> Result<i32> {
    println!("{}", Local::now().format("%d-%m-%Y %H:%M"));
    let host = Host::new(cfg, run_mode)?;
    if !args.dry_run {
        host.stop_stack_on_interrupt();
    }

    let mut summary = RunSummary::new(Operation::Backup, Local::now());
    summary.log_file = log_file;
    let opts = BackupOptions {
        force: args.force,
        dry_run: args.dry_run,
    };
    let result = run_backup(cfg, host.deps(), opts, &mut summary);
    if let Err(err) = &result {
        tracing::error!("{}", err);
    }
    Ok(finish(cfg, host.deps(), summary, result, !args.dry_run))
}
