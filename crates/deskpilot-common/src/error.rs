use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure to turn a natural-language command into a [`crate::plan::Plan`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum InterpretationError {
    #[error("Command is empty")]
    EmptyCommand,

    #[error("Ambiguous command: {0}")]
    Ambiguous(String),

    #[error("Unsupported intent: {0}")]
    UnsupportedIntent(String),

    #[error("Inference backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Inference timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
}

impl InterpretationError {
    pub fn timeout(after: Duration) -> Self {
        InterpretationError::Timeout {
            after_ms: after.as_millis() as u64,
        }
    }

    /// Transient failures the agent may retry with backoff.
    /// Everything else needs the user to rephrase.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InterpretationError::BackendUnavailable(_) | InterpretationError::Timeout { .. }
        )
    }
}

/// Failure inside an executor. Never escapes an executor call: it is always
/// folded into an [`crate::outcome::ActionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl ExecutionError {
    /// Maps an IO failure on `target` onto the execution taxonomy.
    pub fn from_io(err: std::io::Error, target: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ExecutionError::TargetNotFound(target.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                ExecutionError::PermissionDenied(target.to_string())
            }
            _ => ExecutionError::Io(format!("{}: {}", target, err)),
        }
    }
}
