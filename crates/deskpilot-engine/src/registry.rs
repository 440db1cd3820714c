use crate::executor::Executor;
use deskpilot_common::ActionKind;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("No executor registered for {0}")]
    NotFound(ActionKind),

    #[error("{kind} is claimed by both '{existing}' and '{incoming}'")]
    DuplicateKind {
        kind: ActionKind,
        existing: &'static str,
        incoming: &'static str,
    },

    #[error("No executor covers: {}", .0.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", "))]
    MissingExecutor(Vec<ActionKind>),
}

/// Maps action kinds to the executor that performs them.
///
/// Built once at startup and read-only afterwards, so lookups from
/// concurrent agents need no locking.
#[derive(Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<ActionKind, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn resolve(&self, kind: ActionKind) -> Result<Arc<dyn Executor>, RegistryError> {
        self.executors
            .get(&kind)
            .cloned()
            .ok_or(RegistryError::NotFound(kind))
    }

    /// Names of the distinct registered executors, sorted.
    pub fn list(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.executors.values().map(|e| e.name()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.list())
            .finish()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    executors: HashMap<ActionKind, Arc<dyn Executor>>,
}

impl RegistryBuilder {
    pub fn is_claimed(&self, kind: ActionKind) -> bool {
        self.executors.contains_key(&kind)
    }

    /// Registers an executor for every kind it declares. A kind may only be
    /// claimed once.
    pub fn register(mut self, executor: Arc<dyn Executor>) -> Result<Self, RegistryError> {
        for kind in executor.supported_kinds() {
            if let Some(existing) = self.executors.get(kind) {
                return Err(RegistryError::DuplicateKind {
                    kind: *kind,
                    existing: existing.name(),
                    incoming: executor.name(),
                });
            }
        }
        for kind in executor.supported_kinds() {
            self.executors.insert(*kind, executor.clone());
        }
        tracing::debug!(executor = executor.name(), "executor registered");
        Ok(self)
    }

    /// Fails unless every action kind has an executor.
    pub fn build(self) -> Result<ExecutorRegistry, RegistryError> {
        let missing: Vec<ActionKind> = ActionKind::ALL
            .into_iter()
            .filter(|k| !self.executors.contains_key(k))
            .collect();
        if !missing.is_empty() {
            return Err(RegistryError::MissingExecutor(missing));
        }
        Ok(ExecutorRegistry {
            executors: self.executors,
        })
    }
}
