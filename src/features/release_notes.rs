//! Release-note drafting: group raw change lines, draft markdown notes, and
//! optionally polish them to a requested tone.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use super::with_generator;
use crate::generator::{ContentGenerator, GenerationRequest};
use crate::pipeline::{stage_fn, InputSchema, PipelineDefinition, StageContext, StageDescriptor};
use crate::session::StageOutput;

/// Feature key.
pub const KIND: &str = "release-notes";

/// Section headings in output order, with the prefixes that select them.
const SECTIONS: &[(&str, &[&str])] = &[
    ("Features", &["feat", "add", "new"]),
    ("Fixes", &["fix", "bug"]),
    ("Maintenance", &["chore", "refactor", "docs", "build", "ci", "test"]),
];
const OTHER_SECTION: &str = "Other changes";

/// The release-notes pipeline.
pub fn definition(generator: &Arc<dyn ContentGenerator>) -> Result<PipelineDefinition> {
    let schema = InputSchema::new()
        .text("version", 1, 50)
        .list("changes", 1, 200)
        .optional_text("tone", 100);

    PipelineDefinition::new(
        KIND,
        "Release notes",
        schema,
        vec![
            StageDescriptor::new(
                "group",
                "Grouping changes for {{version}}",
                stage_fn(|ctx| async move { group(&ctx) }),
            )
            .produces(&["group_count"]),
            StageDescriptor::new(
                "draft",
                "Drafting notes for {{version}}",
                with_generator(generator, draft),
            )
            .produces(&["draft"]),
            StageDescriptor::new(
                "polish",
                "Polishing notes ({{tone}})",
                with_generator(generator, polish),
            )
            .when_input_has("tone")
            .produces(&["polished"]),
        ],
    )
}

/// Section a change line belongs to, matched on its leading word.
fn section_for(change: &str) -> &'static str {
    let lead: String = change
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_lowercase();
    SECTIONS
        .iter()
        .find(|(_, prefixes)| prefixes.iter().any(|p| lead.starts_with(p)))
        .map_or(OTHER_SECTION, |(title, _)| title)
}

fn group(ctx: &StageContext) -> Result<StageOutput> {
    let changes = ctx.input_list("changes");
    if changes.is_empty() {
        bail!("Input has no changes");
    }

    let titles = SECTIONS
        .iter()
        .map(|(title, _)| *title)
        .chain(std::iter::once(OTHER_SECTION));

    let mut output = StageOutput::new();
    let mut count = 0usize;
    for title in titles {
        let members: Vec<&str> = changes
            .iter()
            .map(String::as_str)
            .filter(|c| section_for(c) == title)
            .collect();
        if members.is_empty() {
            continue;
        }
        output = output.item("change_group", json!({ "title": title, "changes": members }));
        count += 1;
    }
    Ok(output.field("group_count", json!(count)))
}

async fn draft(generator: Arc<dyn ContentGenerator>, ctx: StageContext) -> Result<StageOutput> {
    let version = ctx.input_str("version").context("Input has no version")?;
    let groups: Vec<_> = ctx.result.items_of("change_group").collect();
    if groups.is_empty() {
        bail!("No change groups to draft from");
    }

    let summary = generator
        .generate(&GenerationRequest::new(
            "release_summary",
            format!("Release {version}"),
            1,
        ))
        .await
        .context("Failed to draft summary")?;

    let mut notes = format!("# Release {version}\n\n");
    if let Some(line) = summary.first() {
        let _ = writeln!(notes, "{line}\n");
    }
    for section in groups {
        let title = section.data.get("title").and_then(Value::as_str).unwrap_or(OTHER_SECTION);
        let _ = writeln!(notes, "## {title}\n");
        for change in section
            .data
            .get("changes")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
        {
            let _ = writeln!(notes, "- {change}");
        }
        notes.push('\n');
    }

    Ok(StageOutput::new().field("draft", json!(notes.trim_end())))
}

async fn polish(generator: Arc<dyn ContentGenerator>, ctx: StageContext) -> Result<StageOutput> {
    let tone = ctx.input_str("tone").context("Input has no tone")?;
    let draft = ctx
        .result
        .field("draft")
        .and_then(Value::as_str)
        .context("No draft to polish")?;

    let intro = generator
        .generate(&GenerationRequest::new(
            "polish",
            format!("Rewrite in a {tone} tone\n{draft}"),
            1,
        ))
        .await
        .context("Failed to polish notes")?;

    let polished = match intro.first() {
        Some(line) => format!("{line}\n\n{draft}"),
        None => draft.to_string(),
    };
    Ok(StageOutput::new().field("polished", json!(polished)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::TemplateGenerator;
    use crate::session::{SessionId, SessionResult};

    async fn run_all(input: &Value) -> (PipelineDefinition, SessionResult) {
        let generator: Arc<dyn ContentGenerator> = Arc::new(TemplateGenerator::new());
        let def = definition(&generator).unwrap();
        let mut result = SessionResult::default();
        for stage in def.plan(input) {
            let ctx = StageContext {
                session_id: SessionId::new(),
                kind: KIND.to_string(),
                stage: stage.name.clone(),
                run: 1,
                input: Arc::new(input.clone()),
                result: result.clone(),
            };
            let output = (stage.function)(ctx).await.unwrap();
            result.merge(&stage.name, 1, output);
        }
        (def, result)
    }

    #[test]
    fn test_section_for_prefixes() {
        assert_eq!(section_for("feat: dark mode"), "Features");
        assert_eq!(section_for("Fixed crash on save"), "Fixes");
        assert_eq!(section_for("docs: update readme"), "Maintenance");
        assert_eq!(section_for("Bump version"), OTHER_SECTION);
    }

    #[tokio::test]
    async fn test_draft_groups_changes_in_section_order() {
        let input = json!({
            "version": "2.1.0",
            "changes": ["fix: login loop", "feat: export to CSV", "Bump deps"],
        });
        let (def, result) = run_all(&input).await;

        assert_eq!(result.field("group_count"), Some(&json!(3)));
        let draft = result.field("draft").and_then(Value::as_str).unwrap();
        assert!(draft.starts_with("# Release 2.1.0"));
        let features = draft.find("## Features").unwrap();
        let fixes = draft.find("## Fixes").unwrap();
        assert!(features < fixes);
        assert!(draft.contains("- feat: export to CSV"));
        assert!(result.field("polished").is_none());
        assert!(def.missing_outputs(&input, &result).is_empty());
    }

    #[tokio::test]
    async fn test_polish_runs_only_with_tone() {
        let input = json!({
            "version": "2.1.0",
            "changes": ["feat: export"],
            "tone": "friendly",
        });
        let (_, result) = run_all(&input).await;
        let polished = result.field("polished").and_then(Value::as_str).unwrap();
        assert!(polished.starts_with("polish 1: Rewrite in a friendly tone"));
        assert!(polished.contains("# Release 2.1.0"));
    }
}
