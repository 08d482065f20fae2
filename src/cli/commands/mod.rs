pub mod backup;
pub mod check;
pub mod history;
pub mod restore;

use chrono::Local;

use crate::config::model::RuntimeConfig;
use crate::context::Collaborators;
use crate::error::{Result, VaultError};
use crate::health::certificate::TlsProbe;
use crate::notify::MailCommand;
use crate::remote::Rclone;
use crate::report::{notify, RunSummary};
use crate::runtime::docker::DockerCompose;
use crate::runtime::Runtime;
use crate::signal_handler::signal_handler;
use crate::types::RunMode;
use crate::util::retry::SystemClock;

pub fn exit_for_error(err: &VaultError) -> ! {
    println!("{}", err);
    std::process::exit(err.exit_code());
}

/// Production collaborators: docker, openssl/reqwest, rclone and mail.
pub struct Host {
    runtime: DockerCompose,
    probe: TlsProbe,
    remote: Rclone,
    mailer: MailCommand,
    clock: SystemClock,
}

impl Host {
    pub fn new(cfg: &RuntimeConfig, run_mode: RunMode) -> Result<Self> {
        Ok(Self {
            runtime: DockerCompose::new(&cfg.compose_file, &cfg.stack_dir, run_mode),
            probe: TlsProbe::new()?,
            remote: Rclone::new(run_mode),
            mailer: MailCommand::new(run_mode),
            clock: SystemClock,
        })
    }

    pub fn deps(&self) -> Collaborators<'_> {
        Collaborators {
            runtime: &self.runtime,
            probe: &self.probe,
            remote: &self.remote,
            mailer: &self.mailer,
            clock: &self.clock,
        }
    }

    /// Brings the stack down if the run is interrupted.
    pub fn stop_stack_on_interrupt(&self) {
        let runtime = self.runtime.clone();
        signal_handler(move || {
            if let Err(err) = runtime.stop_services(false) {
                eprintln!("stack shutdown after interrupt failed: {}", err);
            }
        });
    }
}

/// Prints the summary, sends the notification and maps the outcome to an exit code.
pub fn finish(
    cfg: &RuntimeConfig,
    deps: Collaborators<'_>,
    mut summary: RunSummary,
    result: Result<()>,
    send: bool,
) -> i32 {
    summary.finished = Local::now();
    summary.print();
    if send {
        if let Err(err) = notify(deps.mailer, &cfg.notify, &summary) {
            tracing::warn!("notification failed: {}", err);
        }
    }
    match result {
        Ok(()) => 0,
        Err(err) => err.exit_code(),
    }
}
