//! Workbench configuration parser
//!
//! Parses `workbench.toml` into structured settings. Every section is
//! optional; omitted values fall back to the defaults below.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on (default: 127.0.0.1:8080)
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Which session store backs the orchestrator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process memory; lost on restart
    Memory,
    /// One JSON file per session under `data_dir/sessions`
    File,
}

/// Session store settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Backend (default: file)
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    /// Directory for session files and the run log (default: .workbench)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

const fn default_backend() -> StoreBackend {
    StoreBackend::File
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".workbench")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            data_dir: default_data_dir(),
        }
    }
}

/// Explicit bounds on executor and API behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimitsConfig {
    /// Stage timeout when the stage declares none (default: 300)
    #[serde(default = "default_stage_timeout_secs")]
    pub default_stage_timeout_secs: u64,
    /// Whole-run budget, checked at stage boundaries (default: 1800)
    #[serde(default = "default_max_run_duration_secs")]
    pub max_run_duration_secs: u64,
    /// Largest serialized result a session may accumulate (default: 1 MiB)
    #[serde(default = "default_max_result_bytes")]
    pub max_result_bytes: usize,
    /// Retries allowed per session (default: 5)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound on `limit` for list calls (default: 100)
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
    /// `limit` used when the caller gives none (default: 20)
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    /// Longest error message stored on a failed session (default: 500)
    #[serde(default = "default_max_error_len")]
    pub max_error_len: usize,
}

const fn default_stage_timeout_secs() -> u64 {
    300
}

const fn default_max_run_duration_secs() -> u64 {
    1800
}

const fn default_max_result_bytes() -> usize {
    1_048_576
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_max_page_size() -> usize {
    100
}

const fn default_page_size() -> usize {
    20
}

const fn default_max_error_len() -> usize {
    500
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_stage_timeout_secs: default_stage_timeout_secs(),
            max_run_duration_secs: default_max_run_duration_secs(),
            max_result_bytes: default_max_result_bytes(),
            max_retries: default_max_retries(),
            max_page_size: default_max_page_size(),
            default_page_size: default_page_size(),
            max_error_len: default_max_error_len(),
        }
    }
}

impl LimitsConfig {
    /// Default stage timeout as a `Duration`.
    #[must_use]
    pub const fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.default_stage_timeout_secs)
    }

    /// Run budget as a `Duration`.
    #[must_use]
    pub const fn run_budget(&self) -> Duration {
        Duration::from_secs(self.max_run_duration_secs)
    }
}

/// Content-generation backend used by stage functions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorBackend {
    /// Deterministic offline generator
    Template,
    /// External command that prints JSON on stdout
    Command,
}

/// Generator settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Backend (default: template)
    #[serde(default = "default_generator")]
    pub backend: GeneratorBackend,
    /// Program and leading arguments for the command backend
    #[serde(default)]
    pub command: Vec<String>,
}

const fn default_generator() -> GeneratorBackend {
    GeneratorBackend::Template
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backend: default_generator(),
            command: Vec::new(),
        }
    }
}

/// Client-side polling bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between polls in milliseconds (default: 2000)
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Give up after this many polls (default: 600)
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    /// Give up after this much wall-clock time (default: 1200)
    #[serde(default = "default_poll_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_poll_interval_ms() -> u64 {
    2000
}

const fn default_max_polls() -> u32 {
    600
}

const fn default_poll_timeout_secs() -> u64 {
    1200
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
            timeout_secs: default_poll_timeout_secs(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset (default: workbench=info)
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Append finished runs to `data_dir/runs.jsonl` (default: true)
    #[serde(default = "default_run_log")]
    pub run_log: bool,
}

fn default_log_filter() -> String {
    "workbench=info,tower_http=info".to_string()
}

const fn default_run_log() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            run_log: default_run_log(),
        }
    }
}

/// Top-level configuration parsed from workbench.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkbenchConfig {
    /// HTTP server
    #[serde(default)]
    pub server: ServerConfig,
    /// Session store
    #[serde(default)]
    pub store: StoreConfig,
    /// Executor and API limits
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Content generation
    #[serde(default)]
    pub generator: GeneratorConfig,
    /// Client polling
    #[serde(default)]
    pub poll: PollConfig,
    /// Logging
    #[serde(default)]
    pub log: LogConfig,
}

impl WorkbenchConfig {
    /// Parse a workbench.toml file from a path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse from a path, using defaults when the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_path(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse workbench.toml content from a string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse workbench.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed listen address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address: '{}'", self.server.bind))
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        let limits = &self.limits;
        if limits.default_stage_timeout_secs == 0 {
            bail!("limits.default_stage_timeout_secs must be greater than 0");
        }
        if limits.max_run_duration_secs < limits.default_stage_timeout_secs {
            bail!(
                "limits.max_run_duration_secs ({}) must be at least default_stage_timeout_secs ({})",
                limits.max_run_duration_secs,
                limits.default_stage_timeout_secs
            );
        }
        if limits.max_page_size == 0 {
            bail!("limits.max_page_size must be greater than 0");
        }
        if limits.default_page_size == 0 || limits.default_page_size > limits.max_page_size {
            bail!(
                "limits.default_page_size must be between 1 and max_page_size ({})",
                limits.max_page_size
            );
        }
        if limits.max_result_bytes == 0 {
            bail!("limits.max_result_bytes must be greater than 0");
        }

        if self.generator.backend == GeneratorBackend::Command
            && self
                .generator
                .command
                .first()
                .map_or(true, |program| program.trim().is_empty())
        {
            bail!("generator.command is required when generator.backend = \"command\"");
        }

        if self.poll.interval_ms == 0 || self.poll.max_polls == 0 {
            bail!("poll.interval_ms and poll.max_polls must be greater than 0");
        }

        Ok(())
    }
}
