//! End-of-run summary and the notification sent from it.

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Local};

use crate::config::model::NotifySettings;
use crate::error::Result;
use crate::notify::Mailer;
use crate::types::{Action, Operation, Status};

const RULE: &str = "============================================================";

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub operation: Operation,
    pub action: Option<Action>,
    pub status: Status,
    pub app_version: Option<String>,
    pub archive: Option<PathBuf>,
    pub remote: Option<String>,
    pub log_file: Option<PathBuf>,
    pub ledger: Option<PathBuf>,
    pub warnings: Vec<String>,
    /// Failing step or stage, with its message.
    pub error: Option<String>,
    pub started: DateTime<Local>,
    pub finished: DateTime<Local>,
}

impl RunSummary {
    pub fn new(operation: Operation, started: DateTime<Local>) -> Self {
        Self {
            operation,
            action: None,
            status: Status::Success,
            app_version: None,
            archive: None,
            remote: None,
            log_file: None,
            ledger: None,
            warnings: Vec::new(),
            error: None,
            started,
            finished: started,
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn fail(&mut self, error: impl std::fmt::Display) {
        self.status = Status::Fail;
        self.error = Some(error.to_string());
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let path = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        let _ = writeln!(out, "{}", RULE);
        let _ = writeln!(out, "STACKVAULT {} SUMMARY", self.operation.as_str().to_ascii_uppercase());
        let _ = writeln!(out, "{}", RULE);
        let _ = writeln!(out, "Started   : {}", self.started.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "Finished  : {}", self.finished.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(
            out,
            "Duration  : {}s",
            (self.finished - self.started).num_seconds().max(0)
        );
        if let Some(action) = self.action {
            let _ = writeln!(out, "Action    : {} ({})", action, action.describe());
        }
        let _ = writeln!(out, "Status    : {}", self.status);
        let _ = writeln!(
            out,
            "Version   : {}",
            self.app_version.as_deref().unwrap_or("-")
        );
        let _ = writeln!(out, "Archive   : {}", path(&self.archive));
        let _ = writeln!(out, "Remote    : {}", self.remote.as_deref().unwrap_or("-"));
        let _ = writeln!(out, "Ledger    : {}", path(&self.ledger));
        let _ = writeln!(out, "Log       : {}", path(&self.log_file));
        if self.warnings.is_empty() {
            let _ = writeln!(out, "Warnings  : none");
        } else {
            let _ = writeln!(out, "Warnings  : {}", self.warnings.len());
            for warning in &self.warnings {
                let _ = writeln!(out, "  - {}", warning);
            }
        }
        if let Some(error) = &self.error {
            let _ = writeln!(out, "Error     : {}", error);
        }
        let _ = writeln!(out, "{}", RULE);
        out
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }

    pub fn subject(&self) -> String {
        let mut subject = format!("[stackvault] {} {}", self.operation.as_str(), self.status);
        if let Some(action) = self.action {
            if action == Action::Forced {
                subject.push_str(" (forced)");
            }
        }
        if let Some(version) = &self.app_version {
            subject.push_str(&format!(" - {}", version));
        }
        subject
    }
}

/// Failures always notify when an address is configured; other outcomes only
/// with `onSuccess`.
pub fn should_notify(status: Status, settings: &NotifySettings) -> bool {
    if settings.email.is_none() {
        return false;
    }
    match status {
        Status::Fail => true,
        Status::Success | Status::Skipped => settings.on_success,
    }
}

/// Sends the summary with the run log attached, or referenced by path when it
/// exceeds the attachment limit.
pub fn notify(mailer: &dyn Mailer, settings: &NotifySettings, summary: &RunSummary) -> Result<bool> {
    let Some(to) = settings.email.as_deref() else {
        return Ok(false);
    };
    if !should_notify(summary.status, settings) {
        return Ok(false);
    }
    let mut body = summary.render();
    let mut attachment = None;
    if let Some(log) = &summary.log_file {
        match fs::metadata(log) {
            Ok(meta) if meta.len() <= settings.max_attachment_bytes => attachment = Some(log.as_path()),
            Ok(meta) => {
                let _ = writeln!(
                    body,
                    "\nLog not attached ({} bytes exceeds {}); see {}",
                    meta.len(),
                    settings.max_attachment_bytes,
                    log.display()
                );
            }
            Err(_) => {
                let _ = writeln!(body, "\nLog file {} unavailable", log.display());
            }
        }
    }
    mailer.send(to, &summary.subject(), &body, attachment)?;
    tracing::info!("notification sent to {}", to);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{local_time, FakeMailer};
    use tempfile::TempDir;

    fn settings(email: Option<&str>, on_success: bool) -> NotifySettings {
        NotifySettings {
            email: email.map(|s| s.to_string()),
            on_success,
            max_attachment_bytes: 16,
        }
    }

    fn summary(status: Status) -> RunSummary {
        let mut summary = RunSummary::new(Operation::Backup, local_time(2025, 3, 14, 2, 0, 0));
        summary.finished = local_time(2025, 3, 14, 2, 1, 30);
        summary.status = status;
        summary.action = Some(Action::Skipped);
        summary.app_version = Some("1.2.3".to_string());
        summary
    }

    #[test]
    fn render_is_fixed_format() {
        let mut s = summary(Status::Skipped);
        s.warnings.push("remote upload failed".to_string());
        let text = s.render();
        assert!(text.contains("STACKVAULT BACKUP SUMMARY"));
        assert!(text.contains("Action    : SKIPPED (skipped (no changes detected))"));
        assert!(text.contains("Status    : SKIPPED"));
        assert!(text.contains("Duration  : 90s"));
        assert!(text.contains("  - remote upload failed"));
        assert!(!text.contains("Error"));
    }

    #[test]
    fn notification_policy() {
        assert!(!should_notify(Status::Fail, &settings(None, true)));
        assert!(should_notify(Status::Fail, &settings(Some("ops@example.com"), false)));
        assert!(!should_notify(Status::Success, &settings(Some("ops@example.com"), false)));
        assert!(should_notify(Status::Skipped, &settings(Some("ops@example.com"), true)));
    }

    #[test]
    fn small_log_is_attached_large_log_is_referenced() {
        let dir = TempDir::new().expect("tempdir");
        let log = dir.path().join("backup.log");
        fs::write(&log, b"short").expect("write");
        let mailer = FakeMailer::new();
        let mut s = summary(Status::Fail);
        s.log_file = Some(log.clone());
        assert!(notify(&mailer, &settings(Some("ops@example.com"), false), &s).expect("send"));
        let sent = mailer.sent();
        assert_eq!(sent[0].attachment.as_deref(), Some(log.as_path()));

        fs::write(&log, vec![b'x'; 64]).expect("write");
        notify(&mailer, &settings(Some("ops@example.com"), false), &s).expect("send");
        let sent = mailer.sent();
        assert!(sent[1].attachment.is_none());
        assert!(sent[1].body.contains("Log not attached"));
    }
}
