//! The backup pipeline: health gate, drift detection, action decision, archive
//! build, snapshot refresh, retention, ledger and remote replication.

use std::time::SystemTime;

use crate::backup::action::decide_action;
use crate::backup::archive::{ArchiveBuilder, BackupArchive};
use crate::config::env::StackEnv;
use crate::config::model::RuntimeConfig;
use crate::context::Collaborators;
use crate::drift::DriftDetector;
use crate::error::{Result, VaultError};
use crate::health::{resolve_services, HealthGate};
use crate::ledger::{BackupRecord, Ledger};
use crate::remote::RemoteSync;
use crate::report::RunSummary;
use crate::retention::prune_local;
use crate::snapshot::SnapshotStore;
use crate::types::{Action, BackupStep, Status};

pub mod action;
pub mod archive;
pub mod database;

#[derive(Debug, Clone, Copy, Default)]
pub struct BackupOptions {
    pub force: bool,
    /// Detect and decide only; nothing is written.
    pub dry_run: bool,
}

/// Runs one backup invocation and fills `summary`. Every invocation except a dry
/// run leaves exactly one ledger row.
pub fn run_backup(
    cfg: &RuntimeConfig,
    deps: Collaborators<'_>,
    opts: BackupOptions,
    summary: &mut RunSummary,
) -> Result<()> {
    let ledger = Ledger::new(cfg.ledger_path());
    summary.ledger = Some(ledger.path().to_path_buf());
    let result = execute(cfg, deps, opts, &ledger, summary);
    if let Err(err) = &result {
        summary.fail(err);
        if !opts.dry_run {
            let action = summary.action.unwrap_or(if opts.force {
                Action::Forced
            } else {
                Action::Normal
            });
            record(&ledger, summary, action, Status::Fail);
        }
    }
    result
}

fn record(ledger: &Ledger, summary: &mut RunSummary, action: Action, status: Status) {
    let version = summary
        .app_version
        .clone()
        .unwrap_or_else(|| "unknown".to_string());
    let row = BackupRecord::new(summary.started.naive_local(), action, &version, status);
    if let Err(err) = ledger.append(&row) {
        summary.warn(format!("ledger not updated: {}", err));
    }
}

fn execute(
    cfg: &RuntimeConfig,
    deps: Collaborators<'_>,
    opts: BackupOptions,
    ledger: &Ledger,
    summary: &mut RunSummary,
) -> Result<()> {
    let env = StackEnv::load_or_empty(&cfg.env_file)?;
    summary.app_version = Some(env.app_version(&cfg.env_keys));

    if opts.dry_run {
        return preview(cfg, deps, opts, summary);
    }

    let services = resolve_services(&cfg.services, deps.runtime)?;
    let gate = HealthGate::new(deps.runtime, deps.probe, deps.clock, cfg.health.clone());
    let health = gate.run(&services, env.domain(&cfg.env_keys).as_deref());
    if !health.passed() {
        return Err(VaultError::Health(health.failure_summary()));
    }
    for warning in health.warnings() {
        summary.warn(warning);
    }

    let report = DriftDetector::new(cfg, deps.runtime).detect()?;
    if report.bootstrapped {
        tracing::info!("snapshot store bootstrapped; first backup");
    } else if report.has_drift() {
        tracing::info!("drift detected: {}", report.changed.join(", "));
    } else {
        tracing::info!("no drift detected");
    }
    let action = decide_action(&report, opts.force);
    summary.action = Some(action);
    tracing::info!("action: {} - {}", action, action.describe());

    if !action.runs_backup() {
        summary.status = Status::Skipped;
        record(ledger, summary, action, Status::Skipped);
        return Ok(());
    }

    let archive = ArchiveBuilder::new(cfg, deps.runtime, &env).build(summary.started)?;
    summary.archive = Some(archive.path.clone());

    if let Err(err) = SnapshotStore::new(cfg, deps.runtime).refresh() {
        summary.warn(format!("snapshot refresh failed: {}", err));
    }
    match prune_local(&cfg.backup_dir, cfg.retention_days, SystemTime::now()) {
        Ok(pruned) if !pruned.archives.is_empty() => {
            tracing::info!("retention removed {} files", pruned.archives.len())
        }
        Ok(_) => {}
        Err(err) => summary.warn(VaultError::backup(BackupStep::Cleanup, err).to_string()),
    }

    summary.status = Status::Success;
    record(ledger, summary, action, Status::Success);
    replicate(cfg, deps, &archive, ledger, summary);
    Ok(())
}

/// Remote replication is best effort: failures become warnings.
fn replicate(
    cfg: &RuntimeConfig,
    deps: Collaborators<'_>,
    archive: &BackupArchive,
    ledger: &Ledger,
    summary: &mut RunSummary,
) {
    let Some(target) = &cfg.remote else {
        return;
    };
    let sync = RemoteSync::new(deps.remote, deps.clock);
    match sync.push(target, &archive.path, ledger.path()) {
        Ok(()) => summary.remote = Some(target.object(&archive.name)),
        Err(err) => summary.warn(format!("remote upload failed: {}", err)),
    }
    if let Err(err) = sync.prune(target) {
        summary.warn(format!("remote retention failed: {}", err));
    }
}

fn preview(
    cfg: &RuntimeConfig,
    deps: Collaborators<'_>,
    opts: BackupOptions,
    summary: &mut RunSummary,
) -> Result<()> {
    let report = DriftDetector::new(cfg, deps.runtime).preview()?;
    let action = decide_action(&report, opts.force);
    summary.action = Some(action);
    summary.status = if action.runs_backup() {
        Status::Success
    } else {
        Status::Skipped
    };
    if report.bootstrapped {
        println!("dry-run: no snapshot store at {}", cfg.snapshot_dir.display());
    }
    for source in &report.changed {
        println!("dry-run: changed {}", source);
    }
    println!("dry-run: would run {} ({})", action, action.describe());
    Ok(())
}
