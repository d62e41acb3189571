//! Step invoker seam and the registry of named actions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::SagaContext;
use crate::error::StepError;

/// Performs one unit of saga work.
///
/// As seen by the executor an invocation is a function of the context it
/// receives: it returns the output to merge into the context or a
/// classified error. Expected business outcomes such as a denied credit
/// request are successful outputs, not errors.
#[async_trait]
pub trait StepInvoker: Send + Sync {
    async fn invoke(&self, context: SagaContext) -> Result<SagaContext, StepError>;
}

/// Named step invokers that definitions refer to by [`ActionRef`](crate::ActionRef).
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn StepInvoker>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an invoker, replacing any previous one with the same name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        invoker: Arc<dyn StepInvoker>,
    ) -> &mut Self {
        self.actions.insert(name.into(), invoker);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StepInvoker>> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered action names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}
