//! Restore orchestration.
//!
//! `FETCH -> EXTRACT -> VALIDATE_CONFIG -> STOP_STACK -> PLAN_DB_STRATEGY ->
//! RESTORE_VOLUMES -> START_DB -> IMPORT_DB -> START_REST -> HEALTH_GATE -> CLEANUP`.
//! Nothing before STOP_STACK touches the running stack.

use std::fs;
use std::path::{Path, PathBuf};

use crate::backup::archive::{extract_archive, timestamp};
use crate::backup::database::DatabaseTarget;
use crate::config::env::StackEnv;
use crate::config::model::RuntimeConfig;
use crate::context::Collaborators;
use crate::error::{Result, VaultError};
use crate::health::{resolve_services, HealthGate};
use crate::remote::RemoteSync;
use crate::report::RunSummary;
use crate::runtime::HelperMount;
use crate::types::{RestoreStage, Status};
use crate::util::paths::copy_preserving_mtime;
use crate::util::retry::RetryPolicy;
use crate::util::workdir::WorkDir;

pub mod fetch;
pub mod plan;
pub mod validate;

use fetch::{fetch, ArchiveSource};
use plan::{ExtractedArchive, RestorePlan};
use validate::validate_env_backup;

pub const PRE_RESTORE_SUFFIX: &str = ".pre-restore";
const SESSION_PREFIX: &str = "restore";
const EXTRACT_DIR: &str = "extract";

/// Live state of one restore run.
struct RestoreSession<'a> {
    cfg: &'a RuntimeConfig,
    deps: Collaborators<'a>,
    work: Option<WorkDir>,
    archive: Option<PathBuf>,
    extracted: Option<ExtractedArchive>,
    plan: Option<RestorePlan>,
    env: Option<StackEnv>,
}

pub fn run_restore(
    cfg: &RuntimeConfig,
    deps: Collaborators<'_>,
    source: &str,
    summary: &mut RunSummary,
) -> Result<()> {
    let source = ArchiveSource::parse(source);
    summary.archive = Some(PathBuf::from(source.describe()));
    let mut session = RestoreSession {
        cfg,
        deps,
        work: None,
        archive: None,
        extracted: None,
        plan: None,
        env: None,
    };
    let result = session.run(&source, summary);
    match &result {
        Ok(()) => summary.status = Status::Success,
        Err(err) => summary.fail(err),
    }
    result
}

impl<'a> RestoreSession<'a> {
    fn run(&mut self, source: &ArchiveSource, summary: &mut RunSummary) -> Result<()> {
        self.stage(RestoreStage::Fetch, |s| s.fetch(source, summary))?;
        self.stage(RestoreStage::Extract, |s| s.extract())?;
        self.stage(RestoreStage::ValidateConfig, |s| s.validate(summary))?;
        self.stage(RestoreStage::StopStack, |s| s.deps.runtime.stop_services(false))?;
        self.stage(RestoreStage::PlanDbStrategy, |s| s.log_plan())?;
        self.stage(RestoreStage::RestoreVolumes, |s| s.restore_volumes())?;
        self.stage(RestoreStage::StartDb, |s| s.start_database())?;
        if self.plan.as_ref().and_then(|p| p.dump.as_ref()).is_some() {
            self.stage(RestoreStage::ImportDb, |s| s.import_database())?;
        } else {
            tracing::info!("stage {} skipped: no database dump", RestoreStage::ImportDb);
        }
        self.stage(RestoreStage::StartRest, |s| s.deps.runtime.start_services(&[]))?;
        self.stage(RestoreStage::HealthGate, |s| s.health_gate(summary))?;
        self.stage(RestoreStage::Cleanup, |s| {
            s.work.take();
            Ok(())
        })?;
        tracing::info!("restore complete");
        Ok(())
    }

    fn stage<F>(&mut self, stage: RestoreStage, op: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        tracing::info!("stage {}", stage);
        op(self).map_err(|err| {
            tracing::error!("stage {} failed: {}", stage, err);
            if stage.touches_stack() {
                tracing::error!("stack left as of stage {}; inspect before retrying", stage);
            }
            err.at_stage(stage)
        })
    }

    fn session_dir(&self) -> Result<&Path> {
        self.work
            .as_ref()
            .map(|w| w.path())
            .ok_or_else(|| VaultError::message("restore session directory missing"))
    }

    fn fetch(&mut self, source: &ArchiveSource, summary: &mut RunSummary) -> Result<()> {
        let stamp = timestamp(summary.started);
        self.work = Some(WorkDir::create(&self.cfg.backup_dir, SESSION_PREFIX, &stamp)?);
        let sync = RemoteSync::new(self.deps.remote, self.deps.clock);
        let fetched = fetch(source, &sync, self.session_dir()?)?;
        if fetched.downloaded {
            summary.remote = Some(source.describe());
        }
        tracing::info!("archive {}", fetched.path.display());
        self.archive = Some(fetched.path);
        Ok(())
    }

    fn extract(&mut self) -> Result<()> {
        let archive = self
            .archive
            .clone()
            .ok_or_else(|| VaultError::message("no archive fetched"))?;
        let dest = self.session_dir()?.join(EXTRACT_DIR);
        fs::create_dir_all(&dest)
            .map_err(|e| VaultError::message(format!("create {}: {}", dest.display(), e)))?;
        if let Err(err) = extract_archive(&archive, &dest) {
            if let Some(work) = self.work.take() {
                let kept = work.persist();
                tracing::warn!("extraction directory kept at {}", kept.display());
            }
            return Err(err);
        }
        self.extracted = Some(ExtractedArchive::scan(&dest)?);
        Ok(())
    }

    fn validate(&mut self, summary: &mut RunSummary) -> Result<()> {
        let extracted = self
            .extracted
            .as_ref()
            .ok_or_else(|| VaultError::message("archive not extracted"))?;
        let env_backup = extracted
            .env_backup
            .clone()
            .ok_or_else(|| VaultError::message("archive has no .env backup"))?;
        let compose_backup = extracted
            .compose_backup
            .clone()
            .ok_or_else(|| VaultError::message("archive has no docker-compose.yml backup"))?;

        let archived_env = StackEnv::load(&env_backup)?;
        for warning in validate_env_backup(&archived_env, &self.cfg.env_keys)? {
            summary.warn(warning);
        }

        let plan = RestorePlan::build(&self.cfg.volumes, &self.cfg.database_volume, extracted);
        plan.check_database_source(&self.cfg.database_volume, extracted)?;

        install_config(&env_backup, &self.cfg.env_file)?;
        install_config(&compose_backup, &self.cfg.compose_file)?;
        let env = StackEnv::load(&self.cfg.env_file)?;
        summary.app_version = Some(env.app_version(&self.cfg.env_keys));
        self.env = Some(env);
        self.plan = Some(plan);
        Ok(())
    }

    fn log_plan(&mut self) -> Result<()> {
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| VaultError::message("no restore plan"))?;
        tracing::info!("restore plan: {}", plan.describe());
        Ok(())
    }

    fn restore_volumes(&mut self) -> Result<()> {
        let (Some(plan), Some(extracted)) = (self.plan.as_ref(), self.extracted.as_ref()) else {
            return Err(VaultError::message("no restore plan"));
        };
        let runtime = self.deps.runtime;
        for volume in &plan.volumes {
            let tarball = extracted.tarballs.get(volume).ok_or_else(|| {
                VaultError::message(format!("archive has no tarball for volume {}", volume))
            })?;
            let (dir, file) = split_file(tarball)?;
            if runtime.volume_exists(volume)? {
                runtime.remove_volume(volume)?;
            }
            runtime.create_volume(volume)?;
            let mounts = [
                HelperMount::volume(volume, "/volume", false),
                HelperMount::host(dir, "/backup", true),
            ];
            let command = vec![
                "tar".to_string(),
                "xzf".to_string(),
                format!("/backup/{}", file),
                "-C".to_string(),
                "/volume".to_string(),
            ];
            let output = runtime.run_helper(&self.cfg.helper_image, &mounts, &command)?;
            if !output.success() {
                return Err(VaultError::message(format!(
                    "unpack of volume {} exited {}: {}",
                    volume,
                    output.code,
                    output.stderr.trim()
                )));
            }
            tracing::info!("volume {} restored", volume);
        }
        Ok(())
    }

    fn database(&self) -> Result<DatabaseTarget> {
        let env = self
            .env
            .as_ref()
            .ok_or_else(|| VaultError::message("restored environment not loaded"))?;
        Ok(DatabaseTarget::resolve(
            &self.cfg.database_service,
            env,
            &self.cfg.env_keys,
        ))
    }

    fn start_database(&mut self) -> Result<()> {
        let runtime = self.deps.runtime;
        let service = self.cfg.database_service.clone();
        runtime.start_services(std::slice::from_ref(&service))?;
        let gate = HealthGate::new(runtime, self.deps.probe, self.deps.clock, self.cfg.health.clone());
        let report = gate.wait_for_services(std::slice::from_ref(&service));
        if !report.passed() {
            return Err(VaultError::message(format!(
                "database service not ready: {}",
                report.describe_offenders()
            )));
        }
        let db = self.database()?;
        let policy = RetryPolicy::polling(self.cfg.health.interval, self.cfg.health.timeout);
        policy.run(self.deps.clock, "pg_isready", |_| {
            if db.is_ready(runtime) {
                Ok(())
            } else {
                Err(VaultError::message(format!("database {} not accepting connections", db.name)))
            }
        })
    }

    fn import_database(&mut self) -> Result<()> {
        let dump = self
            .plan
            .as_ref()
            .and_then(|p| p.dump.clone())
            .ok_or_else(|| VaultError::message("no database dump"))?;
        self.database()?.import(self.deps.runtime, &dump)
    }

    fn health_gate(&mut self, summary: &mut RunSummary) -> Result<()> {
        let env = self
            .env
            .as_ref()
            .ok_or_else(|| VaultError::message("restored environment not loaded"))?;
        let services = resolve_services(&self.cfg.services, self.deps.runtime)?;
        let gate = HealthGate::new(
            self.deps.runtime,
            self.deps.probe,
            self.deps.clock,
            self.cfg.health.clone(),
        );
        let result = gate.run(&services, env.domain(&self.cfg.env_keys).as_deref());
        for warning in result.warnings() {
            summary.warn(warning);
        }
        if !result.passed() {
            return Err(VaultError::message(result.failure_summary()));
        }
        Ok(())
    }
}

fn split_file(path: &Path) -> Result<(&Path, String)> {
    let dir = path
        .parent()
        .ok_or_else(|| VaultError::message(format!("no parent for {}", path.display())))?;
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| VaultError::message(format!("no file name in {}", path.display())))?;
    Ok((dir, file))
}

/// Keeps the current live file as `<name>.pre-restore`, then installs `archived`.
fn install_config(archived: &Path, live: &Path) -> Result<()> {
    if live.exists() {
        let mut saved = live.as_os_str().to_os_string();
        saved.push(PRE_RESTORE_SUFFIX);
        copy_preserving_mtime(live, Path::new(&saved))?;
    }
    fs::copy(archived, live).map_err(|e| {
        VaultError::message(format!(
            "install {} as {}: {}",
            archived.display(),
            live.display(),
            e
        ))
    })?;
    tracing::info!("installed {}", live.display());
    Ok(())
}
