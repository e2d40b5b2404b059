use crate::models::{ErrorCategory, Job};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// One permanently failed job, as written to the failure log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Local>,
    pub input_path: Utf8PathBuf,
    pub display_name: String,
    pub category: ErrorCategory,
    pub message: String,
    pub kind: String,
    pub retry_count: u32,
    pub duration_secs: f64,
}

impl ErrorRecord {
    /// Build a record from a failed job. Returns `None` if the job carries
    /// no error.
    pub fn from_job(job: &Job) -> Option<Self> {
        let error = job.error.as_ref()?;
        let duration_secs = match (job.started_at, job.ended_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as f64 / 1000.0,
            _ => 0.0,
        };

        Some(Self {
            timestamp: job.ended_at.unwrap_or_else(Local::now),
            input_path: job.input.path.clone(),
            display_name: job.input.display_name.clone(),
            category: error.category,
            message: error.message.clone(),
            kind: error.kind.clone(),
            retry_count: job.retry_count,
            duration_secs,
        })
    }
}

/// Append-only sink for permanently failed jobs.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorLog: Send + Sync {
    fn record(&self, record: &ErrorRecord) -> Result<()>;
}

/// Writes one YAML document per failure, separated by `---`.
#[derive(Debug)]
pub struct FileErrorLog {
    path: Utf8PathBuf,
    write_lock: Mutex<()>,
}

impl FileErrorLog {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Read every record back, e.g. for a post-run report.
    pub fn read_all(&self) -> Result<Vec<ErrorRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read error log: {}", self.path))?;

        content
            .split("\n---\n")
            .map(|doc| doc.trim_start_matches("---\n").trim())
            .filter(|doc| !doc.is_empty())
            .map(|doc| {
                serde_yaml_ng::from_str(doc)
                    .with_context(|| format!("Failed to parse error log entry in {}", self.path))
            })
            .collect()
    }
}

impl ErrorLog for FileErrorLog {
    fn record(&self, record: &ErrorRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = self.path.parent() {
            if !parent.as_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create error log directory: {}", parent))?;
            }
        }

        let yaml = serde_yaml_ng::to_string(record).context("Failed to serialize error record")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open error log: {}", self.path))?;

        write!(file, "---\n{}", yaml)
            .with_context(|| format!("Failed to append to error log: {}", self.path))?;

        tracing::debug!("Recorded failure of {} in {}", record.display_name, self.path);
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryErrorLog {
    records: Mutex<Vec<ErrorRecord>>,
}

impl MemoryErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorLog for MemoryErrorLog {
    fn record(&self, record: &ErrorRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}
