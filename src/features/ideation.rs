//! Idea generation: optional context enrichment, then generate, cluster and
//! score ideas for a problem statement.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use super::{object, with_generator};
use crate::generator::{ContentGenerator, GenerationRequest};
use crate::pipeline::{InputSchema, PipelineDefinition, StageContext, StageDescriptor};
use crate::session::{ResultItem, StageOutput};

/// Feature key.
pub const KIND: &str = "ideation";

const DEFAULT_IDEA_COUNT: usize = 5;
const IDEAS_PER_CLUSTER: usize = 3;

/// The ideation pipeline.
pub fn definition(generator: &Arc<dyn ContentGenerator>) -> Result<PipelineDefinition> {
    let schema = InputSchema::new()
        .text("problem", 10, 2000)
        .optional_text("context", 4000)
        .optional_integer("idea_count", 1, 20);

    PipelineDefinition::new(
        KIND,
        "Idea generation",
        schema,
        vec![
            StageDescriptor::new(
                "enrich",
                "Step {{step}} of {{total}}: reading background context",
                with_generator(generator, enrich),
            )
            .when_input_has("context")
            .produces(&["context_notes"]),
            StageDescriptor::new(
                "generate",
                "Step {{step}} of {{total}}: generating ideas",
                with_generator(generator, generate),
            )
            .produces(&["idea_count"]),
            StageDescriptor::new(
                "cluster",
                "Step {{step}} of {{total}}: grouping ideas into themes",
                with_generator(generator, cluster),
            )
            .produces(&["cluster_count"]),
            StageDescriptor::new(
                "score",
                "Step {{step}} of {{total}}: scoring ideas",
                with_generator(generator, score),
            )
            .produces(&["top_idea"]),
        ],
    )
}

async fn enrich(generator: Arc<dyn ContentGenerator>, ctx: StageContext) -> Result<StageOutput> {
    let context = ctx.input_str("context").context("Input has no context")?;
    let notes = generator
        .generate(&GenerationRequest::new("context_note", context, 3))
        .await
        .context("Failed to summarize context")?;
    Ok(StageOutput::new().field("context_notes", json!(notes)))
}

async fn generate(generator: Arc<dyn ContentGenerator>, ctx: StageContext) -> Result<StageOutput> {
    let problem = ctx.input_str("problem").context("Input has no problem")?;
    let count = ctx
        .input
        .get("idea_count")
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(DEFAULT_IDEA_COUNT);

    let mut prompt = problem.to_string();
    if let Some(notes) = ctx.result.field("context_notes").and_then(Value::as_array) {
        for note in notes.iter().filter_map(Value::as_str) {
            prompt.push('\n');
            prompt.push_str(note);
        }
    }

    let ideas = generator
        .generate(&GenerationRequest::new("idea", prompt, count))
        .await
        .context("Failed to generate ideas")?;

    let mut output = StageOutput::new().field("idea_count", json!(ideas.len()));
    for title in ideas {
        output = output.item("idea", json!({ "title": title }));
    }
    Ok(output)
}

async fn cluster(generator: Arc<dyn ContentGenerator>, ctx: StageContext) -> Result<StageOutput> {
    let ideas: Vec<&ResultItem> = ctx.result.items_of("idea").collect();
    if ideas.is_empty() {
        bail!("No ideas to cluster");
    }
    let problem = ctx.input_str("problem").unwrap_or_default();

    let cluster_count = ideas.len().div_ceil(IDEAS_PER_CLUSTER);
    let names = generator
        .generate(&GenerationRequest::new("theme", problem, cluster_count))
        .await
        .context("Failed to name themes")?;

    let mut output = StageOutput::new().field("cluster_count", json!(cluster_count));
    for index in 0..cluster_count {
        let name = names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("Theme {}", index + 1));
        let members: Vec<&str> = ideas
            .iter()
            .skip(index)
            .step_by(cluster_count)
            .map(|idea| idea.id.as_str())
            .collect();

        for id in &members {
            output = output.annotate(*id, object(json!({ "cluster": name })));
        }
        output = output.item("cluster", json!({ "name": name, "idea_ids": members }));
    }
    Ok(output)
}

async fn score(generator: Arc<dyn ContentGenerator>, ctx: StageContext) -> Result<StageOutput> {
    let ideas: Vec<&ResultItem> = ctx.result.items_of("idea").collect();
    if ideas.is_empty() {
        bail!("No ideas to score");
    }
    let problem = ctx.input_str("problem").unwrap_or_default();

    let cluster_sizes: HashMap<&str, usize> = ctx
        .result
        .items_of("cluster")
        .filter_map(|c| {
            let name = c.data.get("name")?.as_str()?;
            let size = c.data.get("idea_ids")?.as_array()?.len();
            Some((name, size))
        })
        .collect();

    let rationales = generator
        .generate(&GenerationRequest::new("rationale", problem, ideas.len()))
        .await
        .context("Failed to explain scores")?;

    let mut output = StageOutput::new();
    let mut best: Option<(&ResultItem, f64)> = None;
    for (index, idea) in ideas.iter().enumerate() {
        let support = idea
            .data
            .get("cluster")
            .and_then(Value::as_str)
            .and_then(|name| cluster_sizes.get(name))
            .copied()
            .unwrap_or(1);
        let value = score_idea(support, index, ideas.len());
        let rationale = rationales.get(index).cloned().unwrap_or_default();

        output = output.annotate(
            idea.id.as_str(),
            object(json!({ "score": value, "rationale": rationale })),
        );
        if best.map_or(true, |(_, top)| value > top) {
            best = Some((idea, value));
        }
    }

    if let Some((idea, value)) = best {
        let title = idea.data.get("title").cloned().unwrap_or(Value::Null);
        output = output.field(
            "top_idea",
            json!({ "id": idea.id, "title": title, "score": value }),
        );
    }
    Ok(output)
}

/// Score on a 0-10 scale, one decimal.
///
/// Weighs how many ideas share the theme against generation order.
fn score_idea(cluster_size: usize, index: usize, total: usize) -> f64 {
    let as_f64 = |n: usize| f64::from(u32::try_from(n).unwrap_or(u32::MAX));
    let total = as_f64(total.max(1));
    let support = as_f64(cluster_size) / total;
    let position = (total - as_f64(index)) / total;
    ((0.6 * support + 0.4 * position) * 100.0).round() / 10.0
}
