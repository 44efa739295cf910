#![allow(dead_code, missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use serde_json::json;

use workbench::config::LimitsConfig;
use workbench::pipeline::{
    stage_fn, ExecutorSettings, InputSchema, PipelineDefinition, PipelineExecutor,
    PipelineRegistry, StageDescriptor,
};
use workbench::session::{MemoryStore, StageOutput};
use workbench::SessionService;

pub fn output_stage(name: &str) -> StageDescriptor {
    let field = name.to_string();
    StageDescriptor::new(
        name,
        "Running {{stage}} ({{step}}/{{total}})",
        stage_fn(move |_| {
            let output = StageOutput::new().field(field.clone(), json!(true));
            async move { Ok(output) }
        }),
    )
}

pub fn failing_stage(name: &str, message: &str) -> StageDescriptor {
    let message = message.to_string();
    StageDescriptor::new(
        name,
        "Running {{stage}}",
        stage_fn(move |_| {
            let message = message.clone();
            async move { Err(anyhow!(message)) }
        }),
    )
}

pub fn sleeping_stage(name: &str, delay: Duration) -> StageDescriptor {
    let field = name.to_string();
    StageDescriptor::new(
        name,
        "Running {{stage}}",
        stage_fn(move |_| {
            let field = field.clone();
            async move {
                tokio::time::sleep(delay).await;
                Ok(StageOutput::new().field(field, json!(true)))
            }
        }),
    )
}

/// A `demo` pipeline requiring a `topic` of at least 3 characters.
pub fn demo_registry(stages: Vec<StageDescriptor>) -> PipelineRegistry {
    let schema = InputSchema::new().text("topic", 3, 200);
    let mut registry = PipelineRegistry::new();
    registry
        .register(PipelineDefinition::new("demo", "Demo", schema, stages).unwrap())
        .unwrap();
    registry
}

pub fn service(registry: PipelineRegistry) -> (Arc<SessionService>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let limits = LimitsConfig::default();
    let executor = PipelineExecutor::new(store.clone(), ExecutorSettings::from(&limits));
    let service = SessionService::new(registry, store.clone(), executor, limits);
    (Arc::new(service), store)
}
