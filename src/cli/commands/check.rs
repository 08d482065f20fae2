use crate::cli::commands::Host;
use crate::config::env::StackEnv;
use crate::config::model::RuntimeConfig;
use crate::error::Result;
use crate::health::{resolve_services, CertificateCheck, HealthGate};
use crate::types::RunMode;

pub fn run_check_command(cfg: &RuntimeConfig, run_mode: RunMode) -> Result<i32> {
    let host = Host::new(cfg, run_mode)?;
    let deps = host.deps();
    let env = StackEnv::load_or_empty(&cfg.env_file)?;
    let services = resolve_services(&cfg.services, deps.runtime)?;
    let gate = HealthGate::new(deps.runtime, deps.probe, deps.clock, cfg.health.clone());
    let result = gate.run(&services, env.domain(&cfg.env_keys).as_deref());

    for status in &result.containers.services {
        let mark = if status.is_ready() { "ok" } else { "FAIL" };
        println!("  [{}] {}", mark, status);
    }
    match &result.certificate {
        CertificateCheck::Passed(report) => {
            println!(
                "  [ok] certificate {} (issuer {}, {} days left)",
                report.domain,
                report.issuer.as_deref().unwrap_or("?"),
                report
                    .days_remaining
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "?".to_string())
            );
        }
        CertificateCheck::Failed(reason) => println!("  [FAIL] certificate: {}", reason),
        CertificateCheck::Skipped(reason) => println!("  [skip] certificate: {}", reason),
    }
    for warning in result.warnings() {
        println!("  warning: {}", warning);
    }
    if result.passed() {
        println!("health gate passed");
        Ok(0)
    } else {
        println!("health gate failed: {}", result.failure_summary());
        Ok(4)
    }
}
