//! Rolling, tab-separated history of backup invocations.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::types::{Action, Status};

pub const LEDGER_FILE: &str = "backup_history.tsv";
pub const LEDGER_RETENTION_DAYS: i64 = 30;
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const HEADER: [&str; 4] = ["DATE", "ACTION", "APP_VERSION", "STATUS"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupRecord {
    #[serde(rename = "DATE")]
    pub date: String,
    #[serde(rename = "ACTION")]
    pub action: Action,
    #[serde(rename = "APP_VERSION")]
    pub app_version: String,
    #[serde(rename = "STATUS")]
    pub status: Status,
}

impl BackupRecord {
    pub fn new(date: NaiveDateTime, action: Action, app_version: &str, status: Status) -> Self {
        Self {
            date: date.format(DATE_FORMAT).to_string(),
            action,
            app_version: app_version.to_string(),
            status,
        }
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.date, DATE_FORMAT).ok()
    }
}

pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Readable rows only; unreadable ones are logged and skipped.
    pub fn read_records(&self) -> Result<Vec<BackupRecord>> {
        Ok(self.load()?.0)
    }

    /// Readable rows plus the count of rows that failed to deserialize or carry a bad date.
    fn load(&self) -> Result<(Vec<BackupRecord>, usize)> {
        if !self.path.exists() {
            return Ok((Vec::new(), 0));
        }
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(&self.path)
            .map_err(|e| VaultError::message(format!("read {}: {}", self.path.display(), e)))?;
        let mut records = Vec::new();
        let mut unreadable = 0;
        for (idx, result) in reader.deserialize::<BackupRecord>().enumerate() {
            match result {
                Ok(record) if record.timestamp().is_some() => records.push(record),
                Ok(record) => {
                    unreadable += 1;
                    tracing::warn!(
                        "ledger {} row {} has invalid date {:?}",
                        self.path.display(),
                        idx + 2,
                        record.date
                    );
                }
                Err(err) => {
                    unreadable += 1;
                    tracing::warn!(
                        "ledger {} row {} unreadable: {}",
                        self.path.display(),
                        idx + 2,
                        err
                    );
                }
            }
        }
        Ok((records, unreadable))
    }

    /// Appends `record`, then drops rows older than the retention window measured
    /// from `record`. The file is rewritten through a temporary and renamed.
    /// A ledger with unreadable rows is left untouched and the append fails.
    pub fn append(&self, record: &BackupRecord) -> Result<()> {
        let (mut records, unreadable) = self.load()?;
        if unreadable > 0 {
            return Err(VaultError::message(format!(
                "{} has {} unreadable row(s); fix or remove them before the next write",
                self.path.display(),
                unreadable
            )));
        }
        records.push(record.clone());
        let newest = record
            .timestamp()
            .ok_or_else(|| VaultError::message(format!("invalid ledger date {}", record.date)))?;
        let cutoff = newest - Duration::days(LEDGER_RETENTION_DAYS);
        let before = records.len();
        records.retain(|r| r.timestamp().map(|t| t >= cutoff).unwrap_or(false));
        if records.len() < before {
            tracing::debug!("ledger pruned {} rows", before - records.len());
        }
        self.write_all(&records)
    }

    fn write_all(&self, records: &[BackupRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| VaultError::message(format!("create {}: {}", parent.display(), e)))?;
        }
        let tmp = self.path.with_extension("tsv.tmp");
        {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(b'\t')
                .has_headers(false)
                .from_path(&tmp)
                .map_err(|e| VaultError::message(format!("create {}: {}", tmp.display(), e)))?;
            writer
                .write_record(HEADER)
                .map_err(|e| VaultError::message(format!("write ledger header: {}", e)))?;
            for record in records {
                writer
                    .serialize(record)
                    .map_err(|e| VaultError::message(format!("write ledger row: {}", e)))?;
            }
            writer
                .flush()
                .map_err(|e| VaultError::message(format!("flush {}: {}", tmp.display(), e)))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| {
            VaultError::message(format!(
                "rename {} to {}: {}",
                tmp.display(),
                self.path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at(day: u32, month: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, month, day)
            .and_then(|d| d.and_hms_opt(3, 0, 0))
            .expect("date")
    }

    #[test]
    fn first_write_creates_header_and_row() {
        let dir = TempDir::new().expect("tempdir");
        let ledger = Ledger::new(dir.path().join(LEDGER_FILE));
        ledger
            .append(&BackupRecord::new(at(1, 3), Action::Normal, "1.2.3", Status::Success))
            .expect("append");
        let text = fs::read_to_string(ledger.path()).expect("read");
        assert_eq!(
            text,
            "DATE\tACTION\tAPP_VERSION\tSTATUS\n2025-03-01 03:00:00\tNORMAL\t1.2.3\tSUCCESS\n"
        );
    }

    #[test]
    fn rows_older_than_thirty_days_are_pruned() {
        let dir = TempDir::new().expect("tempdir");
        let ledger = Ledger::new(dir.path().join(LEDGER_FILE));
        for day in [1, 10, 20, 28] {
            ledger
                .append(&BackupRecord::new(at(day, 1), Action::Normal, "1.0.0", Status::Success))
                .expect("append");
        }
        ledger
            .append(&BackupRecord::new(at(15, 2), Action::Skipped, "1.0.0", Status::Skipped))
            .expect("append");
        let records = ledger.read_records().expect("read");
        let dates: Vec<_> = records.iter().map(|r| r.date.as_str()).collect();
        assert_eq!(
            dates,
            vec!["2025-01-20 03:00:00", "2025-01-28 03:00:00", "2025-02-15 03:00:00"]
        );
        let text = fs::read_to_string(ledger.path()).expect("read");
        assert!(text.starts_with("DATE\tACTION\tAPP_VERSION\tSTATUS\n"));
    }

    #[test]
    fn window_is_inclusive_of_the_boundary() {
        let dir = TempDir::new().expect("tempdir");
        let ledger = Ledger::new(dir.path().join(LEDGER_FILE));
        ledger
            .append(&BackupRecord::new(at(1, 1), Action::Forced, "1.0.0", Status::Fail))
            .expect("append");
        ledger
            .append(&BackupRecord::new(at(31, 1), Action::Normal, "1.0.0", Status::Success))
            .expect("append");
        assert_eq!(ledger.read_records().expect("read").len(), 2);
    }

    #[test]
    fn unreadable_rows_block_the_rewrite() {
        let dir = TempDir::new().expect("tempdir");
        let ledger = Ledger::new(dir.path().join(LEDGER_FILE));
        let original = "DATE\tACTION\tAPP_VERSION\tSTATUS\n\
2025-03-01 03:00:00\tNORMAL\t1.2.3\tSUCCESS\n\
2025-03-02 03:00:00\tBOGUS\t1.2.3\tSUCCESS\n\
yesterday\tNORMAL\t1.2.3\tSUCCESS\n";
        fs::write(ledger.path(), original).expect("seed");

        assert_eq!(ledger.read_records().expect("read").len(), 1);
        let err = ledger
            .append(&BackupRecord::new(at(3, 3), Action::Normal, "1.2.3", Status::Success))
            .expect_err("unreadable rows");
        assert!(err.to_string().contains("2 unreadable row(s)"), "{}", err);
        assert_eq!(fs::read_to_string(ledger.path()).expect("read"), original);
        assert!(!ledger.path().with_extension("tsv.tmp").exists());
    }

    #[test]
    fn missing_ledger_reads_empty() {
        let dir = TempDir::new().expect("tempdir");
        let ledger = Ledger::new(dir.path().join(LEDGER_FILE));
        assert!(ledger.read_records().expect("read").is_empty());
    }
}
