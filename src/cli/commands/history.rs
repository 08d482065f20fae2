use crate::config::model::RuntimeConfig;
use crate::error::Result;
use crate::ledger::Ledger;

pub fn run_history_command(cfg: &RuntimeConfig) -> Result<i32> {
    let ledger = Ledger::new(cfg.ledger_path());
    let records = ledger.read_records()?;
    if records.is_empty() {
        println!("no backups recorded in {}", ledger.path().display());
        return Ok(0);
    }
    println!("{:<20} {:<8} {:<16} {}", "DATE", "ACTION", "APP_VERSION", "STATUS");
    for record in records {
        println!(
            "{:<20} {:<8} {:<16} {}",
            record.date,
            record.action.as_str(),
            record.app_version,
            record.status.as_str()
        );
    }
    Ok(0)
}
