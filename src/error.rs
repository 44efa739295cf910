//! Error taxonomy for the session orchestrator
//!
//! Synchronous lifecycle calls return `OrchestratorError`. Stage failures are
//! never returned to callers: the executor captures them into the session
//! record through [`summarize_failure`].

use serde::Serialize;
use thiserror::Error;

/// Result alias used by the lifecycle and store layers.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// A single input field that failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    /// Name of the offending input field
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

impl FieldIssue {
    /// Create a field issue.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by the session lifecycle API.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Input rejected at create time; no session was persisted
    #[error("Invalid input: {}", format_issues(.0))]
    Validation(Vec<FieldIssue>),

    /// Unknown session, item, or feature
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the session's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Persistence layer failure
    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Short machine-readable kind, used in HTTP error bodies.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Store(_) => "store_error",
        }
    }
}

fn format_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.field, i.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Condense a stage failure into a message safe to show to clients.
///
/// Keeps the outermost context and the root cause, first line of each,
/// joined by `: `. The result is truncated to `max_len` characters and is
/// never empty.
#[must_use]
pub fn summarize_failure(err: &anyhow::Error, max_len: usize) -> String {
    let first_line = |s: String| s.lines().next().unwrap_or_default().trim().to_string();

    let top = first_line(err.to_string());
    let root = first_line(err.root_cause().to_string());

    let mut summary = if root.is_empty() || root == top {
        top
    } else if top.is_empty() {
        root
    } else {
        format!("{top}: {root}")
    };

    if summary.is_empty() {
        summary = "Stage failed".to_string();
    }

    truncate_chars(&summary, max_len.max(16))
}

/// Truncate to at most `max` characters, marking the cut with `...`.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
