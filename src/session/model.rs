//! Session record and status projection

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::result::SessionResult;

/// Opaque session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of one executor run. Holding it is the in-flight marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Generate a fresh run id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a session is in its pipeline.
///
/// Serializes as a plain string: `"pending"`, `"completed"`, `"failed"`, or
/// the name of the last completed stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// Created or retried, no stage finished yet
    Pending,
    /// The named stage has finished
    Stage(String),
    /// All stages finished and outputs are complete
    Completed,
    /// A stage failed; see `error_message`
    Failed,
}

impl SessionStatus {
    /// Whether no further stage transitions can occur.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// String form used on the wire and in logs.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Stage(name) => name,
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the string form.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            other => Self::Stage(other.to_string()),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SessionStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SessionStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

/// One orchestrated unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique id, immutable
    pub id: SessionId,
    /// Requesting user, absent for anonymous sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Feature key selecting the pipeline definition
    pub kind: String,
    /// Creation payload, never mutated
    pub input: Value,
    /// Current pipeline position
    pub status: SessionStatus,
    /// Stages completed in the current run
    pub progress_step: u32,
    /// Description of the current activity
    pub progress_message: String,
    /// Failure summary, present only while `status` is `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Accumulated stage output
    #[serde(default)]
    pub result: SessionResult,
    /// Number of runs started for this session
    pub run_count: u32,
    /// Run currently allowed to write this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_run: Option<RunId>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Last write
    pub updated_at: DateTime<Utc>,
    /// First transition into a terminal state of the current run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Build a new pending session whose first run is already claimed.
    #[must_use]
    pub fn new(kind: &str, owner_id: Option<String>, input: Value, run: RunId) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            owner_id,
            kind: kind.to_string(),
            input,
            status: SessionStatus::Pending,
            progress_step: 0,
            progress_message: "Queued".to_string(),
            error_message: None,
            result: SessionResult::default(),
            run_count: 1,
            active_run: Some(run),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// The lightweight projection served to polling clients.
    #[must_use]
    pub fn poll_status(&self) -> PollStatus {
        PollStatus {
            status: self.status.clone(),
            progress_step: self.progress_step,
            progress_message: self.progress_message.clone(),
            error_message: if self.status == SessionStatus::Failed {
                self.error_message.clone().unwrap_or_default()
            } else {
                String::new()
            },
        }
    }

    /// Transition into `failed`, releasing the in-flight marker.
    pub fn mark_failed(&mut self, message: String, progress_message: String) {
        let now = Utc::now();
        self.status = SessionStatus::Failed;
        self.error_message = Some(message);
        self.progress_message = progress_message;
        self.completed_at.get_or_insert(now);
        self.active_run = None;
    }

    /// Transition into `completed`, releasing the in-flight marker.
    pub fn mark_completed(&mut self) {
        let now = Utc::now();
        self.status = SessionStatus::Completed;
        self.error_message = None;
        self.progress_message = "Completed".to_string();
        self.completed_at.get_or_insert(now);
        self.active_run = None;
    }

    /// Reset for a new run after a failure.
    pub fn reset_for_retry(&mut self, run: RunId) {
        self.status = SessionStatus::Pending;
        self.progress_step = 0;
        self.progress_message = "Queued for retry".to_string();
        self.error_message = None;
        self.completed_at = None;
        self.run_count += 1;
        self.active_run = Some(run);
    }

    /// Whether `owner` may see this session.
    ///
    /// Ownership is only enforced when the caller identifies itself.
    #[must_use]
    pub fn visible_to(&self, owner: Option<&str>) -> bool {
        match owner {
            None => true,
            Some(owner) => self.owner_id.as_deref() == Some(owner),
        }
    }
}

/// Status-only view for repeated polling.
///
/// `error_message` is non-empty exactly when `status` is `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollStatus {
    /// Current pipeline position
    pub status: SessionStatus,
    /// Stages completed in the current run
    pub progress_step: u32,
    /// Description of the current activity
    pub progress_message: String,
    /// Failure summary, empty unless failed
    #[serde(default)]
    pub error_message: String,
}

impl PollStatus {
    /// Whether the client should stop polling.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
