//! Pipeline definitions and their execution
//!
//! A feature describes its pipeline as data ([`PipelineDefinition`]); the
//! [`PipelineExecutor`] walks sessions through any definition.

pub mod definition;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod template;

pub use definition::{
    stage_fn, PipelineDefinition, StageCondition, StageContext, StageDescriptor, StageFn,
    StageFuture,
};
pub use executor::{ExecutorSettings, PipelineExecutor, RunEnd, RunRequest};
pub use registry::PipelineRegistry;
pub use schema::{FieldKind, FieldRule, InputSchema};
pub use template::{expand_template, stage_vars};
