//! Content generation backends
//!
//! Stage functions never produce text themselves; they describe what they
//! need as a [`GenerationRequest`] and hand it to a [`ContentGenerator`].

pub mod command;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::{GeneratorBackend, GeneratorConfig};
use crate::error::truncate_chars;

pub use command::CommandGenerator;

/// A request for `count` pieces of generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// What the text is for, e.g. `idea` or `test_case`
    pub purpose: String,
    /// Prompt describing the content
    pub prompt: String,
    /// Number of entries wanted
    pub count: usize,
}

impl GenerationRequest {
    /// Create a request.
    pub fn new(purpose: &str, prompt: impl Into<String>, count: usize) -> Self {
        Self {
            purpose: purpose.to_string(),
            prompt: prompt.into(),
            count,
        }
    }
}

/// Produces text entries for stage functions.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Generate entries for `request`.
    ///
    /// Implementations may return fewer entries than asked for but never an
    /// empty list on success.
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>>;
}

/// Deterministic offline generator.
///
/// Entries are derived from the first line of the prompt, so the same
/// request always yields the same output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    /// Create a template generator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContentGenerator for TemplateGenerator {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<String>> {
        let subject = request
            .prompt
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map_or_else(|| "untitled".to_string(), |line| truncate_chars(line, 80));

        let label = request.purpose.replace('_', " ");
        Ok((1..=request.count.max(1))
            .map(|n| format!("{label} {n}: {subject}"))
            .collect())
    }
}

/// Build the generator selected in the config.
pub fn from_config(config: &GeneratorConfig) -> Result<Arc<dyn ContentGenerator>> {
    match config.backend {
        GeneratorBackend::Template => Ok(Arc::new(TemplateGenerator::new())),
        GeneratorBackend::Command => {
            let generator = CommandGenerator::new(config.command.clone())
                .context("Invalid generator.command")?;
            Ok(Arc::new(generator))
        }
    }
}
