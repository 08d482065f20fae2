use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use crate::backup::archive::timestamp;
use crate::cli::args::{Cli, Command};
use crate::cli::commands::{backup, check, exit_for_error, history, restore};
use crate::config::load::{load_config, Overrides, CONFIG_FILE};
use crate::config::model::RuntimeConfig;
use crate::types::{Operation, RunMode};
use crate::util::paths::ensure_dir;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LICENSE_NAME: &str = "GNU GPL v3 or later";

pub mod args;
pub mod commands;

pub fn run() -> Result<()> {
    let cli = parse_cli();

    print_banner();
    if cli.help {
        print_help();
        return Ok(());
    }
    if cli.version {
        println!("License: {}", LICENSE_NAME);
        return Ok(());
    }
    let Some(command) = cli.command.clone() else {
        print_help();
        std::process::exit(2);
    };

    let explicit = cli.config.is_some();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let overrides = overrides_for(&command);
    let cfg = match load_config(&config_path, explicit, &overrides) {
        Ok(cfg) => cfg,
        Err(err) => exit_for_error(&err),
    };

    let run_mode = RunMode {
        dry_run: matches!(&command, Command::Backup(args) if args.dry_run),
        verbose: cli.verbose,
    };

    let code = match command {
        Command::Backup(args) => {
            let log_file = init_tracing(cli.verbose, Some((&cfg, Operation::Backup)));
            backup::run_backup_command(&cfg, &args, run_mode, log_file)
                .context("backup command")?
        }
        Command::Restore(args) => {
            let log_file = init_tracing(cli.verbose, Some((&cfg, Operation::Restore)));
            restore::run_restore_command(&cfg, &args, run_mode, log_file)
                .context("restore command")?
        }
        Command::Check(_) => {
            init_tracing(cli.verbose, None);
            check::run_check_command(&cfg, run_mode).context("check command")?
        }
        Command::History(_) => {
            init_tracing(cli.verbose, None);
            history::run_history_command(&cfg).context("history command")?
        }
    };
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn overrides_for(command: &Command) -> Overrides {
    match command {
        Command::Backup(args) => Overrides {
            stack_dir: args.stack_dir.clone(),
            email: args.email.clone(),
            remote: args.remote.clone(),
            remote_path: args.remote_path.clone(),
            notify_on_success: args.notify_on_success,
        },
        Command::Restore(args) => Overrides {
            stack_dir: args.stack_dir.clone(),
            email: args.email.clone(),
            ..Overrides::default()
        },
        Command::Check(args) | Command::History(args) => Overrides {
            stack_dir: args.stack_dir.clone(),
            ..Overrides::default()
        },
    }
}

fn parse_cli() -> Cli {
    let raw: Vec<String> = env::args().collect();
    match Cli::try_parse_from(raw) {
        Ok(cli) => cli,
        Err(err) => {
            if err.kind() == ErrorKind::DisplayHelp {
                print_banner();
                print_help();
                std::process::exit(0);
            }
            if err.kind() == ErrorKind::UnknownArgument {
                if let Some(arg) = err.context().find_map(|c| {
                    if let clap::error::ContextKind::InvalidArg = c.0 {
                        Some(c.1.to_string())
                    } else {
                        None
                    }
                }) {
                    println!("unknown option {}", arg);
                    std::process::exit(2);
                }
            }
            println!("{}", err);
            std::process::exit(2);
        }
    }
}

fn print_banner() {
    println!("StackVault {}", VERSION);
}

fn print_help() {
    println!("Usage:");
    println!("  stackvault backup [--force] [--dry-run] [--stack-dir <dir>] [--email <addr>]");
    println!("                    [--remote <name[:path]>] [--remote-path <path>] [--notify-on-success]");
    println!("  stackvault restore <archive | remote:path> [--stack-dir <dir>] [--email <addr>]");
    println!("  stackvault check [--stack-dir <dir>]");
    println!("  stackvault history");
    println!("  stackvault --version");
    println!();
    println!("Options:");
    println!("  --config <path>        Config file path (default {})", CONFIG_FILE);
    println!("  --verbose              Debug logging, echo external commands");
    println!("  --force                Back up even when nothing changed");
    println!("  --dry-run              Detect changes and report the action only");
    println!("  --stack-dir <dir>      Directory holding .env and docker-compose.yml");
    println!("  --email <addr>         Notification address");
    println!("  --remote <name[:path]> rclone remote for replication");
    println!("  --remote-path <path>   Path on the remote");
    println!("  --notify-on-success    Also notify on success and skip");
    println!();
    println!("Exit codes: 0 ok or skipped, 1 step failure, 2 usage/config,");
    println!("            3 precondition, 4 health gate, 130 interrupted");
}

fn open_log_file(dir: &Path, operation: Operation) -> Option<(PathBuf, File)> {
    ensure_dir(dir).ok()?;
    let path = dir.join(format!(
        "{}_{}.log",
        operation.as_str(),
        timestamp(Local::now())
    ));
    let file = File::create(&path).ok()?;
    Some((path, file))
}

/// Stdout, plus a per-run log file for operations that report one.
fn init_tracing(verbose: bool, log: Option<(&RuntimeConfig, Operation)>) -> Option<PathBuf> {
    let level = if verbose { "debug" } else { "info" };
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let opened = log.and_then(|(cfg, op)| {
        let opened = open_log_file(&cfg.log_dir, op);
        if opened.is_none() {
            println!("cannot write log file under {}", cfg.log_dir.display());
        }
        opened
    });
    match opened {
        Some((path, file)) => {
            let writer = std::io::stdout.and(Arc::new(file));
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_writer(writer)
                .try_init();
            Some(path)
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .try_init();
            None
        }
    }
}
