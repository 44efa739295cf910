//! HTTP client used by `watch`

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde_json::Value;

use crate::session::PollStatus;

/// Fetches status projections from a running server
#[derive(Debug, Clone)]
pub struct StatusClient {
    http: Client,
    base_url: String,
}

impl StatusClient {
    /// Create a client for the server at `base_url`
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// URL of a session's status endpoint
    #[must_use]
    pub fn status_url(&self, feature: &str, id: &str) -> String {
        format!("{}/{feature}/sessions/{id}/status", self.base_url)
    }

    /// Fetch one status projection
    pub async fn fetch_status(&self, feature: &str, id: &str) -> Result<PollStatus> {
        let url = self.status_url(feature, id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no details");
            bail!("Server returned {status}: {message}");
        }

        response
            .json::<PollStatus>()
            .await
            .context("Failed to parse status response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_url_strips_trailing_slash() {
        let client = StatusClient::new("http://localhost:8080/");
        assert_eq!(
            client.status_url("ideation", "abc"),
            "http://localhost:8080/ideation/sessions/abc/status"
        );
    }
}
