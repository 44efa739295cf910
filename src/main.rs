//! Workbench - generation session orchestrator
//!
//! CLI entry point: run the server, watch a session, list features, or show
//! the run history.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use workbench::cli::{render_features, render_history, StatusClient, WatchDisplay};
use workbench::config::WorkbenchConfig;
use workbench::features::builtin_registry;
use workbench::generator::{ContentGenerator, TemplateGenerator};
use workbench::log::{init_tracing, RunLog};
use workbench::poller::{poll_with, PollError, PollOptions};
use workbench::session::SessionStatus;

/// Generation session orchestrator
///
/// Serves the session lifecycle API for studio features and drives each
/// session through its multi-stage pipeline in the background.
#[derive(Parser, Debug)]
#[command(name = "workbench", version, about)]
struct Cli {
    /// Path to the workbench.toml configuration file
    #[arg(long, global = true, default_value = "workbench.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Listen address, overriding server.bind
        #[arg(long)]
        bind: Option<String>,
    },
    /// Poll a session on a running server until it finishes
    Watch {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
        /// Feature kind of the session
        #[arg(long)]
        feature: String,
        /// Session id
        #[arg(long)]
        id: String,
        /// Poll interval in milliseconds, overriding poll.interval_ms
        #[arg(long)]
        interval: Option<u64>,
    },
    /// List the built-in features and their stages
    Features,
    /// Show finished runs recorded in the run log
    History {
        /// Only show runs of this feature kind
        #[arg(long)]
        feature: Option<String>,
        /// Number of most recent runs to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = WorkbenchConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from '{}'", cli.config.display()))?;
    init_tracing(&config.log.filter);

    match cli.command {
        Command::Serve { bind } => {
            let addr = match bind {
                Some(bind) => bind
                    .parse()
                    .with_context(|| format!("Invalid --bind address: '{bind}'"))?,
                None => config.bind_addr()?,
            };
            workbench::app::serve(&config, addr).await
        }
        Command::Watch {
            url,
            feature,
            id,
            interval,
        } => watch(&config, &url, &feature, &id, interval).await,
        Command::Features => {
            let generator: Arc<dyn ContentGenerator> = Arc::new(TemplateGenerator::new());
            render_features(&builtin_registry(&generator)?);
            Ok(())
        }
        Command::History { feature, limit } => history(&config, feature.as_deref(), limit),
    }
}

fn history(config: &WorkbenchConfig, feature: Option<&str>, limit: usize) -> Result<()> {
    let run_log = RunLog::new(&config.store.data_dir).context("Failed to open run log")?;
    let mut outcomes = run_log.read_all().context("Failed to read run history")?;
    if let Some(feature) = feature {
        outcomes.retain(|outcome| outcome.kind == feature);
    }
    render_history(&outcomes, limit);
    Ok(())
}

async fn watch(
    config: &WorkbenchConfig,
    url: &str,
    feature: &str,
    id: &str,
    interval: Option<u64>,
) -> Result<()> {
    let mut options = PollOptions::from(&config.poll);
    if let Some(ms) = interval {
        options.interval = Duration::from_millis(ms.max(1));
    }

    let client = StatusClient::new(url);
    let mut display = WatchDisplay::new(feature, id);
    display.print_header();
    let started = Instant::now();

    let outcome = poll_with(
        || client.fetch_status(feature, id),
        options,
        |status| display.render_status(status),
    )
    .await;

    match outcome {
        Ok(status) => {
            display.render_summary(&status, started.elapsed().as_secs());
            if status.status == SessionStatus::Failed {
                bail!("Session {id} failed: {}", status.error_message);
            }
            Ok(())
        }
        Err(PollError::Timeout { polls, last_status }) => {
            bail!("Stopped watching after {polls} polls; session still '{last_status}'")
        }
        Err(e) => Err(e).context("Watching failed"),
    }
}
