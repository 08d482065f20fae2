use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "stackvault", disable_help_flag = true, disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, short = 'h')]
    pub help: bool,
    #[arg(long)]
    pub version: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    Backup(BackupArgs),
    Restore(RestoreArgs),
    Check(CheckArgs),
    History(CheckArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct BackupArgs {
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub stack_dir: Option<PathBuf>,
    #[arg(long)]
    pub email: Option<String>,
    /// rclone remote, optionally `name:path`.
    #[arg(long)]
    pub remote: Option<String>,
    #[arg(long)]
    pub remote_path: Option<String>,
    #[arg(long)]
    pub notify_on_success: bool,
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    /// Local archive path or `remote:path`.
    pub archive: String,
    #[arg(long)]
    pub stack_dir: Option<PathBuf>,
    #[arg(long)]
    pub email: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CheckArgs {
    #[arg(long)]
    pub stack_dir: Option<PathBuf>,
}
