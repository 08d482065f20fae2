//! Health gate: container readiness and public certificate validity.

use std::sync::Mutex;

use chrono::Utc;

use crate::config::model::HealthSettings;
use crate::error::{Result, VaultError};
use crate::runtime::{Runtime, ServiceStatus};
use crate::util::retry::{Clock, RetryPolicy};

pub mod certificate;

use certificate::{evaluate_certificate, status_is_acceptable, CertificateProbe, CertificateReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateCheck {
    Passed(CertificateReport),
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct ContainerReport {
    pub services: Vec<ServiceStatus>,
}

impl ContainerReport {
    pub fn offenders(&self) -> Vec<&ServiceStatus> {
        self.services.iter().filter(|s| !s.is_ready()).collect()
    }

    pub fn passed(&self) -> bool {
        !self.services.is_empty() && self.offenders().is_empty()
    }

    pub fn describe_offenders(&self) -> String {
        self.offenders()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone)]
pub struct HealthGateResult {
    pub containers: ContainerReport,
    pub certificate: CertificateCheck,
}

impl HealthGateResult {
    pub fn passed(&self) -> bool {
        self.containers.passed() && !matches!(self.certificate, CertificateCheck::Failed(_))
    }

    pub fn warnings(&self) -> Vec<String> {
        match &self.certificate {
            CertificateCheck::Passed(report) => report.warnings.clone(),
            CertificateCheck::Skipped(reason) => vec![format!("certificate check skipped: {}", reason)],
            CertificateCheck::Failed(_) => Vec::new(),
        }
    }

    pub fn failure_summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.containers.passed() {
            parts.push(format!("services not ready: {}", self.containers.describe_offenders()));
        }
        if let CertificateCheck::Failed(reason) = &self.certificate {
            parts.push(format!("certificate: {}", reason));
        }
        parts.join("; ")
    }
}

pub struct HealthGate<'a> {
    runtime: &'a dyn Runtime,
    probe: &'a dyn CertificateProbe,
    clock: &'a dyn Clock,
    settings: HealthSettings,
}

impl<'a> HealthGate<'a> {
    pub fn new(
        runtime: &'a dyn Runtime,
        probe: &'a dyn CertificateProbe,
        clock: &'a dyn Clock,
        settings: HealthSettings,
    ) -> Self {
        Self {
            runtime,
            probe,
            clock,
            settings,
        }
    }

    /// One status pass; each service is queried on its own thread.
    fn poll_once(&self, names: &[String]) -> Vec<ServiceStatus> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = names
                .iter()
                .map(|name| {
                    scope.spawn(move || match self.runtime.service_status(name) {
                        Ok(status) => status,
                        Err(err) => ServiceStatus {
                            name: name.clone(),
                            state: format!("unknown ({})", err),
                            health: None,
                        },
                    })
                })
                .collect();
            handles
                .into_iter()
                .zip(names)
                .map(|(handle, name)| {
                    handle.join().unwrap_or_else(|_| ServiceStatus::missing(name))
                })
                .collect()
        })
    }

    /// Polls until every service is ready or the timeout elapses. Never errors on
    /// timeout; the report carries the offenders with their last-seen status.
    pub fn wait_for_services(&self, names: &[String]) -> ContainerReport {
        let policy = RetryPolicy::polling(self.settings.interval, self.settings.timeout);
        let last = Mutex::new(Vec::new());
        let outcome = policy.run(self.clock, "service readiness", |_| {
            let statuses = self.poll_once(names);
            let report = ContainerReport {
                services: statuses.clone(),
            };
            if let Ok(mut guard) = last.lock() {
                *guard = statuses;
            }
            if report.passed() {
                Ok(report)
            } else {
                Err(VaultError::Health(format!(
                    "waiting for {}",
                    report.describe_offenders()
                )))
            }
        });
        match outcome {
            Ok(report) => report,
            Err(_) => ContainerReport {
                services: last.into_inner().unwrap_or_default(),
            },
        }
    }

    pub fn check_certificate(&self, domain: Option<&str>) -> CertificateCheck {
        let Some(domain) = domain else {
            return CertificateCheck::Skipped("no domain configured".to_string());
        };
        let policy =
            RetryPolicy::exponential(self.settings.https_attempts, self.settings.https_backoff);
        let reached = policy.run(self.clock, &format!("https://{}", domain), |_| {
            let code = self.probe.https_status(domain)?;
            if status_is_acceptable(code) {
                Ok(code)
            } else {
                Err(VaultError::message(format!("unexpected status {}", code)))
            }
        });
        if let Err(err) = reached {
            return CertificateCheck::Failed(format!("https://{} unreachable: {}", domain, err));
        }
        let info = match self.probe.fetch_certificate(domain) {
            Ok(info) => info,
            Err(err) => return CertificateCheck::Failed(err.to_string()),
        };
        let report =
            evaluate_certificate(domain, &info, Utc::now(), self.settings.expiry_warning_days);
        if report.passed() {
            CertificateCheck::Passed(report)
        } else {
            CertificateCheck::Failed(report.errors.join("; "))
        }
    }

    pub fn run(&self, services: &[String], domain: Option<&str>) -> HealthGateResult {
        let containers = self.wait_for_services(services);
        for status in &containers.services {
            tracing::info!("service {}", status);
        }
        let certificate = self.check_certificate(domain);
        match &certificate {
            CertificateCheck::Passed(report) => tracing::info!(
                "certificate for {} issued by {} valid until {}",
                report.domain,
                report.issuer.as_deref().unwrap_or("?"),
                report
                    .not_after
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_else(|| "?".to_string())
            ),
            CertificateCheck::Failed(reason) => tracing::error!("certificate check failed: {}", reason),
            CertificateCheck::Skipped(reason) => tracing::warn!("certificate check skipped: {}", reason),
        }
        HealthGateResult {
            containers,
            certificate,
        }
    }
}

/// Resolves the service list: configured names, else everything the compose file defines.
pub fn resolve_services(configured: &[String], runtime: &dyn Runtime) -> Result<Vec<String>> {
    if !configured.is_empty() {
        return Ok(configured.to_vec());
    }
    let services = runtime.list_services()?;
    if services.is_empty() {
        return Err(VaultError::precondition("compose file defines no services"));
    }
    Ok(services)
}
