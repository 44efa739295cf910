//! Client-side polling loop
//!
//! Repeatedly fetches a session's [`PollStatus`] until it is terminal,
//! bounded by a poll count and a wall-clock timeout.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::PollConfig;
use crate::session::{PollStatus, SessionStatus};

/// Bounds for one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Delay between fetches
    pub interval: Duration,
    /// Maximum number of fetches
    pub max_polls: u32,
    /// Maximum wall-clock time
    pub timeout: Duration,
}

impl From<&PollConfig> for PollOptions {
    fn from(config: &PollConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms),
            max_polls: config.max_polls,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::from(&PollConfig::default())
    }
}

/// Why polling stopped before a terminal status.
#[derive(Error, Debug)]
pub enum PollError {
    /// Poll count or wall-clock bound exhausted
    #[error("Gave up after {polls} polls, last status '{last_status}'")]
    Timeout {
        /// Fetches made
        polls: u32,
        /// Last status observed
        last_status: String,
    },

    /// `progress_step` went backwards within one run
    #[error("Progress regressed from step {from} to {to}")]
    Regressed {
        /// Step seen before
        from: u32,
        /// Smaller step seen after
        to: u32,
    },

    /// The fetch function failed
    #[error("Status fetch failed: {0:#}")]
    Fetch(#[source] anyhow::Error),
}

/// Poll until terminal, ignoring intermediate statuses.
pub async fn poll_until_terminal<F, Fut>(
    fetch: F,
    options: PollOptions,
) -> Result<PollStatus, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<PollStatus>>,
{
    poll_with(fetch, options, |_| {}).await
}

/// Poll until terminal, calling `on_status` for every fetched status.
///
/// A step decrease counts as a regression unless the session went back to
/// `pending`, which is how a retry starts a new run.
pub async fn poll_with<F, Fut, O>(
    mut fetch: F,
    options: PollOptions,
    mut on_status: O,
) -> Result<PollStatus, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<PollStatus>>,
    O: FnMut(&PollStatus),
{
    let deadline = Instant::now() + options.timeout;
    let mut last: Option<PollStatus> = None;
    let mut polls = 0;

    while polls < options.max_polls {
        polls += 1;
        let status = fetch().await.map_err(PollError::Fetch)?;

        if let Some(previous) = &last {
            if status.progress_step < previous.progress_step
                && status.status != SessionStatus::Pending
            {
                return Err(PollError::Regressed {
                    from: previous.progress_step,
                    to: status.progress_step,
                });
            }
        }

        on_status(&status);
        if status.is_terminal() {
            return Ok(status);
        }
        last = Some(status);

        if polls == options.max_polls || Instant::now() + options.interval > deadline {
            break;
        }
        tokio::time::sleep(options.interval).await;
    }

    Err(PollError::Timeout {
        polls,
        last_status: last.map_or_else(|| "unknown".to_string(), |s| s.status.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn status(name: &str, step: u32) -> PollStatus {
        PollStatus {
            status: SessionStatus::from_name(name),
            progress_step: step,
            progress_message: String::new(),
            error_message: if name == "failed" {
                "boom".to_string()
            } else {
                String::new()
            },
        }
    }

    fn scripted(
        statuses: Vec<PollStatus>,
    ) -> impl FnMut() -> std::future::Ready<anyhow::Result<PollStatus>> {
        let queue = Arc::new(Mutex::new(VecDeque::from(statuses)));
        move || {
            let next = queue.lock().unwrap().pop_front();
            std::future::ready(next.ok_or_else(|| anyhow::anyhow!("script exhausted")))
        }
    }

    fn fast() -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(1),
            max_polls: 10,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_returns_terminal_status() {
        let fetch = scripted(vec![
            status("pending", 0),
            status("generate", 1),
            status("completed", 2),
        ]);
        let mut seen = Vec::new();
        let done = poll_with(fetch, fast(), |s| seen.push(s.progress_step))
            .await
            .unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failed_is_terminal() {
        let fetch = scripted(vec![status("generate", 1), status("failed", 1)]);
        let done = poll_until_terminal(fetch, fast()).await.unwrap();
        assert_eq!(done.error_message, "boom");
    }

    #[tokio::test]
    async fn test_gives_up_after_max_polls() {
        let fetch = scripted(vec![status("pending", 0); 20]);
        let options = PollOptions {
            max_polls: 3,
            ..fast()
        };
        match poll_until_terminal(fetch, options).await {
            Err(PollError::Timeout { polls, last_status }) => {
                assert_eq!(polls, 3);
                assert_eq!(last_status, "pending");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_at_wall_clock_timeout() {
        let fetch = scripted(vec![status("generate", 1); 100]);
        let options = PollOptions {
            interval: Duration::from_secs(2),
            max_polls: 100,
            timeout: Duration::from_secs(5),
        };
        match poll_until_terminal(fetch, options).await {
            Err(PollError::Timeout { polls, .. }) => assert_eq!(polls, 3),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_detects_regression() {
        let fetch = scripted(vec![status("cluster", 2), status("generate", 1)]);
        let err = poll_until_terminal(fetch, fast()).await.unwrap_err();
        assert!(matches!(err, PollError::Regressed { from: 2, to: 1 }));
    }

    #[tokio::test]
    async fn test_retry_reset_is_not_regression() {
        let fetch = scripted(vec![
            status("cluster", 2),
            status("pending", 0),
            status("completed", 3),
        ]);
        let done = poll_until_terminal(fetch, fast()).await.unwrap();
        assert_eq!(done.progress_step, 3);
    }

    #[tokio::test]
    async fn test_fetch_error_stops_polling() {
        let fetch = scripted(vec![status("pending", 0)]);
        let err = poll_until_terminal(fetch, fast()).await.unwrap_err();
        assert!(err.to_string().contains("script exhausted"));
    }
}
