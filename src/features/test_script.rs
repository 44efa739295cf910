//! Test-script authoring: analyze user stories into scenarios, draft a test
//! case per scenario, then review coverage.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use super::{object, with_generator};
use crate::generator::{ContentGenerator, GenerationRequest};
use crate::pipeline::{InputSchema, PipelineDefinition, StageContext, StageDescriptor};
use crate::session::StageOutput;

/// Feature key.
pub const KIND: &str = "test-script";

const STEPS_PER_CASE: usize = 3;

/// The test-script pipeline.
pub fn definition(generator: &Arc<dyn ContentGenerator>) -> Result<PipelineDefinition> {
    let schema = InputSchema::new()
        .text("feature", 3, 200)
        .list("stories", 1, 50)
        .optional_text("notes", 4000);

    PipelineDefinition::new(
        KIND,
        "Test script writer",
        schema,
        vec![
            StageDescriptor::new(
                "analyze",
                "Analyzing stories for {{feature}}",
                with_generator(generator, analyze),
            )
            .produces(&["scenarios"]),
            StageDescriptor::new(
                "draft",
                "Drafting test cases",
                with_generator(generator, draft),
            )
            .produces(&["test_case_count"]),
            StageDescriptor::new(
                "review",
                "Reviewing coverage",
                with_generator(generator, review),
            )
            .produces(&["coverage"]),
        ],
    )
}

async fn analyze(generator: Arc<dyn ContentGenerator>, ctx: StageContext) -> Result<StageOutput> {
    let stories = ctx.input_list("stories");
    if stories.is_empty() {
        bail!("Input has no stories");
    }

    let mut scenarios = Vec::with_capacity(stories.len());
    for (index, story) in stories.iter().enumerate() {
        let found = generator
            .generate(&GenerationRequest::new("scenario", story.as_str(), 1))
            .await
            .with_context(|| format!("Failed to analyze story {}", index + 1))?;
        for scenario in found {
            scenarios.push(json!({ "story": index, "scenario": scenario }));
        }
    }

    Ok(StageOutput::new().field("scenarios", Value::Array(scenarios)))
}

async fn draft(generator: Arc<dyn ContentGenerator>, ctx: StageContext) -> Result<StageOutput> {
    let scenarios = ctx
        .result
        .field("scenarios")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if scenarios.is_empty() {
        bail!("No scenarios to draft");
    }

    let mut output = StageOutput::new();
    let mut drafted = 0usize;
    for scenario in &scenarios {
        let Some(text) = scenario.get("scenario").and_then(Value::as_str) else {
            continue;
        };
        let steps = generator
            .generate(&GenerationRequest::new("test_step", text, STEPS_PER_CASE))
            .await
            .context("Failed to draft test steps")?;

        output = output.item(
            "test_case",
            json!({
                "title": text,
                "story": scenario.get("story").cloned().unwrap_or(Value::Null),
                "steps": steps,
                "expected": format!("{text} behaves as described"),
            }),
        );
        drafted += 1;
    }

    Ok(output.field("test_case_count", json!(drafted)))
}

async fn review(generator: Arc<dyn ContentGenerator>, ctx: StageContext) -> Result<StageOutput> {
    let feature = ctx.input_str("feature").unwrap_or_default();
    let story_count = ctx.input_list("stories").len();
    let cases: Vec<_> = ctx.result.items_of("test_case").collect();
    if cases.is_empty() {
        bail!("No test cases to review");
    }

    let notes = generator
        .generate(&GenerationRequest::new("review_note", feature, cases.len()))
        .await
        .context("Failed to review test cases")?;

    let mut covered: Vec<u64> = cases
        .iter()
        .filter_map(|c| c.data.get("story").and_then(Value::as_u64))
        .collect();
    covered.sort_unstable();
    covered.dedup();

    let mut output = StageOutput::new().field(
        "coverage",
        json!({
            "stories": story_count,
            "stories_covered": covered.len(),
            "test_cases": cases.len(),
        }),
    );
    for (case, note) in cases.iter().zip(notes.iter().cycle()) {
        output = output.annotate(
            case.id.as_str(),
            object(json!({ "reviewed": true, "review_note": note })),
        );
    }
    Ok(output)
}
