//! Shared test utilities
//!
//! Scripted stage functions used across test modules. Only compiled in test
//! builds.

use std::time::Duration;

use anyhow::anyhow;
use serde_json::json;

use crate::pipeline::{stage_fn, StageDescriptor};
use crate::session::StageOutput;

/// A stage that sets field `<name>` to `value`.
#[must_use]
pub fn output_stage(name: &str, value: &str) -> StageDescriptor {
    let field = name.to_string();
    let value = value.to_string();
    StageDescriptor::new(
        name,
        "Running {{stage}}",
        stage_fn(move |_| {
            let output = StageOutput::new().field(field.clone(), json!(value.clone()));
            async move { Ok(output) }
        }),
    )
}

/// A stage that always fails with `message`.
#[must_use]
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

/// A stage that sleeps for `delay` and then sets field `<name>`.
#[must_use]
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

/// A stage whose function panics.
#[must_use]
pub fn panicking_stage(name: &str) -> StageDescriptor {
    StageDescriptor::new(
        name,
        "Running {{stage}}",
        stage_fn(|ctx| async move {
            assert!(ctx.stage.is_empty(), "stage {} exploded", ctx.stage);
            Ok(StageOutput::new())
        }),
    )
}
