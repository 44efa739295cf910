//! External command generator
//!
//! Spawns the configured program with the prompt as its final argument and
//! reads a JSON list of entries from stdout. The purpose and count travel as
//! `WORKBENCH_PURPOSE` and `WORKBENCH_COUNT` environment variables.

use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use super::{ContentGenerator, GenerationRequest};

/// Generator backed by an external program.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    /// Create from `[program, args...]`.
    pub fn new(command: Vec<String>) -> Result<Self> {
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .filter(|p| !p.trim().is_empty())
            .context("Generator command is empty")?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Build the command for one request.
    #[must_use]
    pub fn build_command(&self, request: &GenerationRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(&request.prompt)
            .env("WORKBENCH_PURPOSE", &request.purpose)
            .env("WORKBENCH_COUNT", request.count.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ContentGenerator for CommandGenerator {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>> {
        let output = self
            .build_command(request)
            .output()
            .await
            .with_context(|| format!("Failed to spawn generator '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.lines().next().unwrap_or_default().trim();
            match output.status.code() {
                Some(code) => bail!("Generator exited with code {code}: {reason}"),
                None => bail!("Generator terminated by signal: {reason}"),
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let entries = parse_entries(&stdout)?;
        debug!(purpose = %request.purpose, entries = entries.len(), "Generator returned");
        Ok(entries)
    }
}

/// Extract entries from generator stdout.
///
/// Accepts a JSON array of strings or an object with an `entries` array.
/// When stdout holds more than one line, the last line that parses wins.
pub fn parse_entries(stdout: &str) -> Result<Vec<String>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        bail!("Generator produced no output");
    }

    let value = serde_json::from_str::<Value>(trimmed).ok().or_else(|| {
        trimmed
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
    });
    let Some(value) = value else {
        bail!("Generator output is not valid JSON");
    };

    let list = match &value {
        Value::Array(list) => list,
        Value::Object(map) => match map.get("entries") {
            Some(Value::Array(list)) => list,
            _ => bail!("Generator output object has no 'entries' array"),
        },
        _ => bail!("Generator output must be a JSON array or object"),
    };

    let entries: Vec<String> = list
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if entries.is_empty() {
        bail!("Generator returned no entries");
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_empty_command() {
        assert!(CommandGenerator::new(vec![]).is_err());
        assert!(CommandGenerator::new(vec!["  ".into()]).is_err());
    }

    #[test]
    fn test_build_command_appends_prompt() {
        let generator = CommandGenerator::new(vec!["gen".into(), "--json".into()]).unwrap();
        let cmd = generator.build_command(&GenerationRequest::new("idea", "Reduce churn", 4));
        let std_cmd = cmd.as_std();

        assert_eq!(std_cmd.get_program(), "gen");
        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(args, vec!["--json", "Reduce churn"]);
        let count = std_cmd
            .get_envs()
            .find(|(k, _)| *k == "WORKBENCH_COUNT")
            .and_then(|(_, v)| v);
        assert_eq!(count, Some(std::ffi::OsStr::new("4")));
    }

    #[test]
    fn test_parse_array_and_object() {
        assert_eq!(parse_entries(r#"["a", " b ", ""]"#).unwrap(), vec!["a", "b"]);
        assert_eq!(
            parse_entries(r#"{"entries": ["x"]}"#).unwrap(),
            vec!["x"]
        );
    }

    #[test]
    fn test_parse_last_json_line_wins() {
        let stdout = "warming up...\n[\"first\"]\nnoise\n[\"second\"]\n";
        assert_eq!(parse_entries(stdout).unwrap(), vec!["second"]);
    }

    #[test]
    fn test_parse_rejects_bad_output() {
        assert!(parse_entries("").is_err());
        assert!(parse_entries("not json").is_err());
        assert!(parse_entries("42").is_err());
        assert!(parse_entries("[]").is_err());
        assert!(parse_entries(r#"{"items": []}"#).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generate_runs_command() {
        let generator = CommandGenerator::new(vec![
            "sh".into(),
            "-c".into(),
            r#"printf '["%s for %s"]' "$1" "$WORKBENCH_PURPOSE""#.into(),
            "sh".into(),
        ])
        .unwrap();

        let entries = generator
            .generate(&GenerationRequest::new("idea", "churn", 1))
            .await
            .unwrap();
        assert_eq!(entries, vec!["churn for idea"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generate_reports_exit_code() {
        let generator = CommandGenerator::new(vec![
            "sh".into(),
            "-c".into(),
            "echo 'quota exceeded' >&2; exit 3".into(),
        ])
        .unwrap();

        let err = generator
            .generate(&GenerationRequest::new("idea", "churn", 1))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Generator exited with code 3: quota exceeded");
    }
}
