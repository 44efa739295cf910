//! Pipeline definitions
//!
//! A feature describes its pipeline as data: ordered stage descriptors, each
//! bound to a stage function. The executor consumes definitions without
//! knowing anything feature-specific.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use futures::future::BoxFuture;
use serde_json::Value;

use crate::pipeline::schema::InputSchema;
use crate::session::{SessionId, SessionResult, StageOutput};

/// Status names a stage may not use.
const RESERVED_NAMES: &[&str] = &["pending", "completed", "failed"];

/// What a stage function receives.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Session being processed
    pub session_id: SessionId,
    /// Feature kind
    pub kind: String,
    /// Stage name
    pub stage: String,
    /// Run number (1 for the first run, +1 per retry)
    pub run: u32,
    /// Immutable session input
    pub input: Arc<Value>,
    /// Stored result as this stage starts
    ///
    /// Includes output from earlier runs for stages that have not re-run
    /// yet, plus sticky user corrections. Compare an entry's `run` with
    /// [`StageContext::run`] to tell fresh output from carried-over output.
    pub result: SessionResult,
}

impl StageContext {
    /// A string field from the input, if present and non-empty.
    #[must_use]
    pub fn input_str(&self, name: &str) -> Option<&str> {
        self.input
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// A list-of-strings field from the input.
    #[must_use]
    pub fn input_list(&self, name: &str) -> Vec<String> {
        self.input
            .get(name)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Future returned by a stage function.
pub type StageFuture = BoxFuture<'static, Result<StageOutput>>;

/// A unit of work within a pipeline.
pub type StageFn = Arc<dyn Fn(StageContext) -> StageFuture + Send + Sync>;

/// Wrap an async closure as a [`StageFn`].
pub fn stage_fn<F, Fut>(f: F) -> StageFn
where
    F: Fn(StageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StageOutput>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// When a stage takes part in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageCondition {
    /// Every run
    Always,
    /// Only when the input carries a non-empty value for this field
    WhenInputHas(String),
}

impl StageCondition {
    /// Evaluate against a session input.
    #[must_use]
    pub fn applies(&self, input: &Value) -> bool {
        match self {
            Self::Always => true,
            Self::WhenInputHas(field) => match input.get(field) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(Value::Array(a)) => !a.is_empty(),
                Some(_) => true,
            },
        }
    }
}

/// One stage of a pipeline.
#[derive(Clone)]
pub struct StageDescriptor {
    /// Stage name, used as the session status once it completes
    pub name: String,
    /// Progress message template shown while the stage runs
    pub message: String,
    /// Whether this stage runs for a given input
    pub condition: StageCondition,
    /// Per-stage timeout; falls back to the configured default
    pub timeout: Option<Duration>,
    /// Result fields this stage must leave behind for completion
    pub produces: Vec<String>,
    /// The bound stage function
    pub function: StageFn,
}

impl StageDescriptor {
    /// Create an always-run stage.
    pub fn new(name: &str, message: &str, function: StageFn) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
            condition: StageCondition::Always,
            timeout: None,
            produces: Vec::new(),
            function,
        }
    }

    /// Only run when the input has `field`.
    #[must_use]
    pub fn when_input_has(mut self, field: &str) -> Self {
        self.condition = StageCondition::WhenInputHas(field.to_string());
        self
    }

    /// Set a stage timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Declare fields this stage must produce.
    #[must_use]
    pub fn produces(mut self, fields: &[&str]) -> Self {
        self.produces = fields.iter().map(|f| (*f).to_string()).collect();
        self
    }

    /// Whether the stage can be skipped.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.condition != StageCondition::Always
    }
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("name", &self.name)
            .field("message", &self.message)
            .field("condition", &self.condition)
            .field("timeout", &self.timeout)
            .field("produces", &self.produces)
            .finish_non_exhaustive()
    }
}

/// Declarative description of one feature's pipeline.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    /// Feature key, also the URL segment
    pub kind: String,
    /// Human-readable feature title
    pub title: String,
    /// Input validation rules
    pub schema: InputSchema,
    /// Ordered stages
    pub stages: Vec<StageDescriptor>,
}

impl PipelineDefinition {
    /// Build and validate a definition.
    pub fn new(
        kind: &str,
        title: &str,
        schema: InputSchema,
        stages: Vec<StageDescriptor>,
    ) -> Result<Self> {
        let definition = Self {
            kind: kind.to_string(),
            title: title.to_string(),
            schema,
            stages,
        };
        definition.validate()?;
        Ok(definition)
    }

    fn validate(&self) -> Result<()> {
        if self.kind.is_empty()
            || !self
                .kind
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            bail!(
                "Invalid pipeline kind '{}': use lowercase letters, digits and '-'",
                self.kind
            );
        }

        if self.stages.is_empty() {
            bail!("Pipeline '{}' has no stages", self.kind);
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                bail!("Pipeline '{}' has a stage with an empty name", self.kind);
            }
            if RESERVED_NAMES.contains(&stage.name.as_str()) {
                bail!(
                    "Pipeline '{}' uses reserved stage name '{}'",
                    self.kind,
                    stage.name
                );
            }
            if !seen.insert(stage.name.as_str()) {
                bail!(
                    "Pipeline '{}' has duplicate stage name '{}'",
                    self.kind,
                    stage.name
                );
            }
        }

        Ok(())
    }

    /// Stages that take part in a run for `input`, in order.
    #[must_use]
    pub fn plan(&self, input: &Value) -> Vec<&StageDescriptor> {
        self.stages
            .iter()
            .filter(|s| s.condition.applies(input))
            .collect()
    }

    /// Declared outputs of the planned stages that `result` lacks.
    #[must_use]
    pub fn missing_outputs(&self, input: &Value, result: &SessionResult) -> Vec<String> {
        self.plan(input)
            .iter()
            .flat_map(|s| s.produces.iter())
            .filter(|field| result.field(field).is_none())
            .cloned()
            .collect()
    }

    /// All stage names in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> StageFn {
        stage_fn(|_ctx| async { Ok(StageOutput::new()) })
    }

    fn stage(name: &str) -> StageDescriptor {
        StageDescriptor::new(name, "Running {{stage}}", noop())
    }

    #[test]
    fn test_valid_definition() {
        let def = PipelineDefinition::new(
            "ideation",
            "Ideation",
            InputSchema::new(),
            vec![stage("generate"), stage("cluster")],
        )
        .unwrap();
        assert_eq!(def.stage_names(), vec!["generate", "cluster"]);
    }

    #[test]
    fn test_reject_empty_stage_list() {
        let err = PipelineDefinition::new("x", "X", InputSchema::new(), vec![]).unwrap_err();
        assert!(err.to_string().contains("no stages"));
    }

    #[test]
    fn test_reject_duplicate_stage_names() {
        let err = PipelineDefinition::new(
            "x",
            "X",
            InputSchema::new(),
            vec![stage("a"), stage("a")],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate stage name"));
    }

    #[test]
    fn test_reject_reserved_stage_name() {
        let err = PipelineDefinition::new("x", "X", InputSchema::new(), vec![stage("completed")])
            .unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_reject_bad_kind() {
        let err = PipelineDefinition::new("Test Script", "X", InputSchema::new(), vec![stage("a")])
            .unwrap_err();
        assert!(err.to_string().contains("Invalid pipeline kind"));
    }

    #[test]
    fn test_plan_skips_conditional_stage() {
        let def = PipelineDefinition::new(
            "ideation",
            "Ideation",
            InputSchema::new(),
            vec![
                stage("enrich").when_input_has("context"),
                stage("generate"),
            ],
        )
        .unwrap();

        let without: Vec<&str> = def
            .plan(&json!({"problem": "p"}))
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(without, vec!["generate"]);

        let blank: Vec<&str> = def
            .plan(&json!({"context": "  "}))
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(blank, vec!["generate"]);

        let with: Vec<&str> = def
            .plan(&json!({"context": "Prior research"}))
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(with, vec!["enrich", "generate"]);
        assert!(def.stages[0].is_optional());
    }

    #[test]
    fn test_missing_outputs_only_counts_planned_stages() {
        let def = PipelineDefinition::new(
            "ideation",
            "Ideation",
            InputSchema::new(),
            vec![
                stage("enrich").when_input_has("context").produces(&["context_notes"]),
                stage("generate").produces(&["ideas"]),
            ],
        )
        .unwrap();

        let mut result = SessionResult::default();
        assert_eq!(def.missing_outputs(&json!({}), &result), vec!["ideas"]);

        result.merge("generate", 1, StageOutput::new().field("ideas", json!(3)));
        assert!(def.missing_outputs(&json!({}), &result).is_empty());
        assert_eq!(
            def.missing_outputs(&json!({"context": "c"}), &result),
            vec!["context_notes"]
        );
    }

    #[test]
    fn test_context_input_helpers() {
        let ctx = StageContext {
            session_id: SessionId::new(),
            kind: "test-script".into(),
            stage: "analyze".into(),
            run: 1,
            input: Arc::new(json!({"title": "  Login  ", "blank": " ", "stories": ["a", 1, "b"]})),
            result: SessionResult::default(),
        };
        assert_eq!(ctx.input_str("title"), Some("Login"));
        assert_eq!(ctx.input_str("blank"), None);
        assert_eq!(ctx.input_list("stories"), vec!["a", "b"]);
        assert!(ctx.input_list("missing").is_empty());
    }
}
