//! Built-in feature pipelines
//!
//! Each feature contributes one [`PipelineDefinition`]. Stage functions talk
//! to a shared [`ContentGenerator`] and never touch the store.

pub mod ideation;
pub mod release_notes;
pub mod test_script;

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{Map, Value};

use crate::generator::ContentGenerator;
use crate::pipeline::{stage_fn, PipelineRegistry, StageContext, StageFn};
use crate::session::StageOutput;

/// Registry holding every built-in feature.
pub fn builtin_registry(generator: &Arc<dyn ContentGenerator>) -> Result<PipelineRegistry> {
    let mut registry = PipelineRegistry::new();
    registry.register(ideation::definition(generator)?)?;
    registry.register(test_script::definition(generator)?)?;
    registry.register(release_notes::definition(generator)?)?;
    Ok(registry)
}

/// Bind a stage function that needs the generator.
fn with_generator<F, Fut>(generator: &Arc<dyn ContentGenerator>, f: F) -> StageFn
where
    F: Fn(Arc<dyn ContentGenerator>, StageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StageOutput>> + Send + 'static,
{
    let generator = Arc::clone(generator);
    stage_fn(move |ctx| f(Arc::clone(&generator), ctx))
}

/// Unwrap a `json!({...})` literal into annotation values.
fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
