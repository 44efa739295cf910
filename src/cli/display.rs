//! Terminal display for `watch`, `features` and `history`
//!
//! All output goes to stderr so stdout remains clean for piping.

use colored::Colorize;

use crate::error::truncate_chars;
use crate::log::RunOutcome;
use crate::pipeline::PipelineRegistry;
use crate::session::{PollStatus, SessionStatus};

/// Renders polled statuses for one session
pub struct WatchDisplay {
    label: String,
    last: Option<PollStatus>,
}

impl WatchDisplay {
    /// Create a display for `feature/id`
    #[must_use]
    pub fn new(feature: &str, id: &str) -> Self {
        Self {
            label: format!("{feature}/{id}"),
            last: None,
        }
    }

    /// Print the header at the start of watching
    pub fn print_header(&self) {
        eprintln!(
            "\n{} {}",
            "===".bold().cyan(),
            format!("Session: {}", self.label).bold().cyan()
        );
        eprintln!("{}", "─".repeat(50).dimmed());
    }

    /// Print `status` if it differs from the last one shown
    pub fn render_status(&mut self, status: &PollStatus) {
        if self.last.as_ref() == Some(status) {
            return;
        }
        let line = status_line(status);
        match status.status {
            SessionStatus::Completed => eprintln!("  {} {}", "✓".green().bold(), line.green()),
            SessionStatus::Failed => eprintln!("  {} {}", "✗".red().bold(), line.red()),
            _ => eprintln!("  {} {}", "▶".blue(), line),
        }
        self.last = Some(status.clone());
    }

    /// Print the final summary
    pub fn render_summary(&self, status: &PollStatus, elapsed_secs: u64) {
        eprintln!("{}", "─".repeat(50).dimmed());
        let outcome = if status.status == SessionStatus::Failed {
            "FAILED".red().bold().to_string()
        } else {
            "COMPLETED".green().bold().to_string()
        };
        eprintln!("  {} {}", outcome, self.label.bold());
        if !status.error_message.is_empty() {
            eprintln!("  {}", truncate_chars(&status.error_message, 200));
        }
        let mins = elapsed_secs / 60;
        let secs = elapsed_secs % 60;
        eprintln!(
            "  {} {} stage(s) | {mins}m {secs}s",
            "Stats:".dimmed(),
            status.progress_step
        );
        eprintln!();
    }
}

/// One-line plain description of a status
#[must_use]
pub fn status_line(status: &PollStatus) -> String {
    let message = truncate_chars(&status.progress_message, 120);
    if status.status == SessionStatus::Failed && !status.error_message.is_empty() {
        return format!(
            "[{}] step {}: {}",
            status.status,
            status.progress_step,
            truncate_chars(&status.error_message, 120)
        );
    }
    format!(
        "[{}] step {}: {message}",
        status.status, status.progress_step
    )
}

/// Print registered pipelines and their stages
pub fn render_features(registry: &PipelineRegistry) {
    for def in registry.iter() {
        eprintln!("{} {}", def.kind.bold(), format!("({})", def.title).dimmed());
        for stage in &def.stages {
            let marker = if stage.is_optional() {
                " (optional)".dimmed().to_string()
            } else {
                String::new()
            };
            eprintln!("  - {}{marker}", stage.name);
        }
    }
}

/// One-line plain description of a finished run
#[must_use]
pub fn history_line(outcome: &RunOutcome) -> String {
    let mut line = format!(
        "{} {} {} run {} [{}] {} stage(s) in {}.{}s",
        outcome.timestamp.format("%Y-%m-%d %H:%M:%S"),
        outcome.kind,
        outcome.session_id,
        outcome.run,
        outcome.status,
        outcome.stages_completed,
        outcome.duration_ms / 1000,
        outcome.duration_ms % 1000 / 100
    );
    if let Some(error) = &outcome.error {
        line.push_str(": ");
        line.push_str(&truncate_chars(error, 120));
    }
    line
}

/// Print the last `limit` runs, newest last
pub fn render_history(outcomes: &[RunOutcome], limit: usize) {
    if outcomes.is_empty() {
        eprintln!("{}", "No runs recorded".dimmed());
        return;
    }
    let start = outcomes.len().saturating_sub(limit);
    for outcome in &outcomes[start..] {
        let line = history_line(outcome);
        if outcome.status == SessionStatus::Failed {
            eprintln!("  {} {}", "✗".red().bold(), line);
        } else {
            eprintln!("  {} {}", "✓".green().bold(), line);
        }
    }
}
