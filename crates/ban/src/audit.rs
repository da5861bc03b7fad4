use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use logwarden_common::{LogwardenError, LogwardenResult};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Ban,
    Unban,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditAction::Ban => f.write_str("BAN"),
            AuditAction::Unban => f.write_str("UNBAN"),
        }
    }
}

/// One ban or unban action, stamped with wall-clock unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: i64,
    pub action: AuditAction,
    pub key: String,
}

impl AuditRecord {
    pub fn now(action: AuditAction, key: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().timestamp(),
            action,
            key: key.into(),
        }
    }

    /// `timestamp,action,key`, with the key quoted when it needs to be.
    pub fn to_csv_line(&self) -> String {
        format!("{},{},{}", self.timestamp, self.action, csv_field(&self.key))
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Destination for ban/unban records. Implementations must accept calls from
/// many tasks at once.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> LogwardenResult<()>;
}

/// Appends records to a CSV file, one writer at a time.
#[derive(Debug)]
pub struct CsvAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl CsvAuditSink {
    /// Open `path` for appending, creating it if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> LogwardenResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                LogwardenError::AuditWrite(format!("failed to open {}: {}", path.display(), e))
            })?;
        info!(path = %path.display(), "opened audit file");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for CsvAuditSink {
    fn record(&self, record: &AuditRecord) -> LogwardenResult<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| LogwardenError::AuditWrite("audit file lock poisoned".to_string()))?;
        writeln!(file, "{}", record.to_csv_line())
            .and_then(|()| file.flush())
            .map_err(|e| {
                LogwardenError::AuditWrite(format!("failed to write {}: {}", self.path.display(), e))
            })
    }
}

/// Keeps records in memory; used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit records lock poisoned").clone()
    }

    pub fn count(&self, action: AuditAction, key: &str) -> usize {
        self.records
            .lock()
            .expect("audit records lock poisoned")
            .iter()
            .filter(|r| r.action == action && r.key == key)
            .count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &AuditRecord) -> LogwardenResult<()> {
        self.records
            .lock()
            .map_err(|_| LogwardenError::AuditWrite("audit records lock poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }
}
