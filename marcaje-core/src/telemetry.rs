//! Run-dated JSON-lines log file.
//!
//! Every notable event of one invocation is appended as a single JSON
//! record to `marcaje-logs-<run>-<date>.log`. This file is the only
//! state that outlives the process.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        ruts: usize,
        workers: usize,
        debug: bool,
    },
    RutStarted {
        rut_masked: String,
        correlation_id: String,
    },
    RutCompleted {
        rut_masked: String,
        correlation_id: String,
        action: String,
        duration_seconds: f64,
    },
    RutFailed {
        rut_masked: String,
        correlation_id: String,
        error: String,
    },
    RutSkipped {
        rut_masked: String,
        correlation_id: String,
    },
    HolidaySkip {
        title: String,
        source: String,
    },
    RunFinished {
        successes: usize,
        errors: usize,
        skips: usize,
        delay_collisions: u64,
    },
}

#[derive(Debug, Serialize)]
struct RunRecord<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a RunEvent,
}

#[derive(Debug)]
pub struct RunTelemetry {
    log: Mutex<File>,
    path: PathBuf,
}

impl RunTelemetry {
    /// Opens (appending) the run-dated log file under `logs_dir`.
    /// `run_label` distinguishes invocations within one day, e.g. a CI
    /// run number.
    pub fn new(logs_dir: impl AsRef<Path>, run_label: &str) -> Result<Self, TelemetryError> {
        let logs_dir = logs_dir.as_ref();
        create_dir_all(logs_dir)?;
        let date = Utc::now().format("%Y-%m-%d");
        let path = logs_dir.join(format!("marcaje-logs-{run_label}-{date}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            log: Mutex::new(file),
            path,
        })
    }

    pub fn record(&self, event: &RunEvent) -> Result<(), TelemetryError> {
        let record = RunRecord {
            timestamp: Utc::now(),
            event,
        };
        let json = serde_json::to_string(&record)?;
        if let Ok(mut guard) = self.log.lock() {
            writeln!(guard, "{json}")?;
            guard.flush()?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
