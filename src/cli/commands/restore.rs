use std::path::PathBuf;

use chrono::Local;

use crate::cli::args::RestoreArgs;
use crate::cli::commands::{finish, Host};
use crate::config::model::RuntimeConfig;
use crate::error::Result;
use crate::report::RunSummary;
use crate::restore::run_restore;
use crate::types::{Operation, RunMode};

pub fn run_restore_command(
    cfg: &RuntimeConfig,
    args: &RestoreArgs,
    run_mode: RunMode,
    log_file: Option<PathBuf>,
) -> Result<i32> {
    println!("{}", Local::now().format("%d-%m-%Y %H:%M"));
    let host = Host::new(cfg, run_mode)?;
    host.stop_stack_on_interrupt();

    let mut summary = RunSummary::new(Operation::Restore, Local::now());
    summary.log_file = log_file;
    let result = run_restore(cfg, host.deps(), &args.archive, &mut summary);
    if let Err(err) = &result {
        tracing::error!("{}", err);
    }
    Ok(finish(cfg, host.deps(), summary, result, true))
}
