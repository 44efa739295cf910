//! JSONL (JSON Lines) history of finished pipeline runs
//!
//! Provides append-only logging of run outcomes to `<data_dir>/runs.jsonl`

use std::fs::{self, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{SessionId, SessionStatus};

/// Represents the outcome of a single pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunOutcome {
    /// Session the run belonged to
    pub session_id: SessionId,
    /// Feature kind
    pub kind: String,
    /// Run number (1-indexed)
    pub run: u32,
    /// Terminal status reached
    pub status: SessionStatus,
    /// Stages completed before the run ended
    pub stages_completed: u32,
    /// Failure summary for failed runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the run ended
    pub timestamp: DateTime<Utc>,
    /// Wall-clock duration of the run in milliseconds
    pub duration_ms: u64,
}

/// JSONL logger for run history
///
/// Each line is a JSON object representing a single run outcome. Appends
/// from concurrent runs are serialized so lines never interleave.
#[derive(Debug)]
pub struct RunLog {
    log_path: PathBuf,
    append_lock: Mutex<()>,
}

impl RunLog {
    /// Create a new run log in `log_dir`
    ///
    /// # Errors
    /// Returns an error if the log directory cannot be created
    pub fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        let log_dir = log_dir.as_ref();

        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

        Ok(Self {
            log_path: log_dir.join("runs.jsonl"),
            append_lock: Mutex::new(()),
        })
    }

    /// Append a run outcome to the log
    pub fn append(&self, outcome: &RunOutcome) -> Result<()> {
        let json = serde_json::to_string(outcome).context("Failed to serialize run outcome")?;

        let _guard = self.append_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("Failed to open log file: {}", self.log_path.display()))?;

        writeln!(file, "{json}").context("Failed to write to log file")?;

        Ok(())
    }

    /// Read all run outcomes from the log, in chronological order
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or a line is not valid JSON
    pub fn read_all(&self) -> Result<Vec<RunOutcome>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.log_path)
            .with_context(|| format!("Failed to read log file: {}", self.log_path.display()))?;

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(line_num, line)| {
                serde_json::from_str::<RunOutcome>(line)
                    .with_context(|| format!("Failed to parse line {} as JSON", line_num + 1))
            })
            .collect()
    }

    /// Get the path to the log file
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}
