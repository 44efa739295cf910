//! Registry of pipeline definitions keyed by feature kind

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::pipeline::definition::PipelineDefinition;

/// Read-only lookup from feature kind to its definition.
#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    definitions: BTreeMap<String, Arc<PipelineDefinition>>,
}

impl PipelineRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition. Kinds must be unique.
    pub fn register(&mut self, definition: PipelineDefinition) -> Result<()> {
        if self.definitions.contains_key(&definition.kind) {
            bail!("Duplicate pipeline kind: '{}'", definition.kind);
        }
        self.definitions
            .insert(definition.kind.clone(), Arc::new(definition));
        Ok(())
    }

    /// Look up a definition.
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<Arc<PipelineDefinition>> {
        self.definitions.get(kind).cloned()
    }

    /// Registered definitions in kind order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PipelineDefinition>> {
        self.definitions.values()
    }

    /// Registered kinds in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        self.definitions.keys().map(String::as_str).collect()
    }
}
