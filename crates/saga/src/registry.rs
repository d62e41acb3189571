//! Registry of validated saga definitions.

use std::collections::HashMap;
use std::sync::Arc;

use crate::definition::SagaDefinition;
use crate::error::DefinitionError;
use crate::invoker::ActionRegistry;

/// Saga definitions by name. Only definitions that pass validation against
/// the action registry can be registered.
#[derive(Debug, Clone, Default)]
pub struct DefinitionRegistry {
    definitions: HashMap<String, Arc<SagaDefinition>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers a definition.
    pub fn register(
        &mut self,
        definition: SagaDefinition,
        actions: &ActionRegistry,
    ) -> Result<(), DefinitionError> {
        if self.definitions.contains_key(&definition.name) {
            return Err(DefinitionError::AlreadyRegistered(definition.name));
        }
        definition.validate(actions)?;
        tracing::debug!(definition = %definition.name, steps = definition.steps.len(), "definition registered");
        self.definitions
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<SagaDefinition>> {
        self.definitions.get(name).cloned()
    }

    /// Registered definition names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
