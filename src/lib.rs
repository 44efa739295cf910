//! Workbench - generation session orchestrator
//!
//! Drives multi-stage generation sessions for studio features: creates
//! sessions, walks them through their pipeline in the background, exposes
//! progress to polling clients, and supports retry of failed runs.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod features;
pub mod generator;
pub mod log;
pub mod pipeline;
pub mod poller;
pub mod service;
pub mod session;

#[cfg(test)]
pub mod testutil;

// Re-export commonly used types
pub use config::WorkbenchConfig;
pub use error::{OrchestratorError, Result};
pub use generator::{ContentGenerator, GenerationRequest, TemplateGenerator};
pub use pipeline::{PipelineDefinition, PipelineExecutor, PipelineRegistry, StageDescriptor};
pub use poller::{poll_until_terminal, PollError, PollOptions};
pub use service::{Page, SessionService};
pub use session::{PollStatus, Session, SessionId, SessionStatus, SessionStore};
