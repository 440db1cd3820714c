use super::Executor;
use async_trait::async_trait;
use deskpilot_common::{Action, ActionKind, ExecutionError};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

/// Claims every action kind and performs none of them.
#[derive(Debug, Clone, Default)]
pub struct DryRunExecutor {
    performed: Arc<Mutex<Vec<Action>>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn performed(&self) -> Vec<Action> {
        self.performed
            .lock()
            .map(|actions| actions.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Executor for DryRunExecutor {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn supported_kinds(&self) -> &'static [ActionKind] {
        &ActionKind::ALL
    }

    async fn perform(&self, action: &Action) -> Result<Option<Value>, ExecutionError> {
        tracing::info!(%action, "dry run");
        if let Ok(mut performed) = self.performed.lock() {
            performed.push(action.clone());
        }
        Ok(Some(json!({ "dry_run": true })))
    }
}
