use crate::action::Action;
use crate::error::{ExecutionError, InterpretationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Succeeded,
    Failed,
    /// Not dispatched: verification declined, plan aborted or cancelled.
    Skipped,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    TargetNotFound,
    Timeout,
    Unsupported,
    Io,
    /// Policy or the user declined the action.
    VerificationDenied,
    /// An earlier action in the same plan failed.
    PlanAborted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultError {
    pub kind: ErrorKind,
    pub detail: String,
}

/// Result of processing one action.
///
/// `error` is present exactly when `status` is not `succeeded`; the
/// constructors are the only way to build one, and deserialisation
/// rejects records that break the rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawActionResult")]
pub struct ActionResult {
    status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ResultError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<Value>,
}

#[derive(Deserialize)]
struct RawActionResult {
    status: ResultStatus,
    #[serde(default)]
    error: Option<ResultError>,
    #[serde(default)]
    output: Option<Value>,
}

#[derive(Debug, Error)]
pub enum InconsistentResult {
    #[error("succeeded result carries an error")]
    UnexpectedError,
    #[error("{0:?} result has no error")]
    MissingError(ResultStatus),
}

impl TryFrom<RawActionResult> for ActionResult {
    type Error = InconsistentResult;

    fn try_from(raw: RawActionResult) -> Result<Self, Self::Error> {
        match (raw.status, &raw.error) {
            (ResultStatus::Succeeded, Some(_)) => return Err(InconsistentResult::UnexpectedError),
            (status, None) if status != ResultStatus::Succeeded => {
                return Err(InconsistentResult::MissingError(status));
            }
            _ => {}
        }
        Ok(Self {
            status: raw.status,
            error: raw.error,
            output: raw.output,
        })
    }
}

impl ActionResult {
    pub fn succeeded(output: Option<Value>) -> Self {
        Self {
            status: ResultStatus::Succeeded,
            error: None,
            output,
        }
    }

    pub fn failed(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self::with_error(ResultStatus::Failed, kind, detail)
    }

    pub fn timed_out(detail: impl Into<String>) -> Self {
        Self::with_error(ResultStatus::TimedOut, ErrorKind::Timeout, detail)
    }

    pub fn skipped(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self::with_error(ResultStatus::Skipped, kind, detail)
    }

    fn with_error(status: ResultStatus, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(ResultError {
                kind,
                detail: detail.into(),
            }),
            output: None,
        }
    }

    pub fn status(&self) -> ResultStatus {
        self.status
    }

    pub fn error(&self) -> Option<&ResultError> {
        self.error.as_ref()
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Succeeded
    }

    /// Failed or timed out: the statuses that abort a non-best-effort plan.
    pub fn is_failure(&self) -> bool {
        matches!(self.status, ResultStatus::Failed | ResultStatus::TimedOut)
    }
}

impl From<ExecutionError> for ActionResult {
    fn from(err: ExecutionError) -> Self {
        let detail = err.to_string();
        match err {
            ExecutionError::Timeout(_) => ActionResult::timed_out(detail),
            ExecutionError::PermissionDenied(_) => {
                ActionResult::failed(ErrorKind::PermissionDenied, detail)
            }
            ExecutionError::TargetNotFound(_) => {
                ActionResult::failed(ErrorKind::TargetNotFound, detail)
            }
            ExecutionError::Unsupported(_) => ActionResult::failed(ErrorKind::Unsupported, detail),
            ExecutionError::Io(_) => ActionResult::failed(ErrorKind::Io, detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: Action,
    pub result: ActionResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    /// Best-effort plan ran to the end with at least one unsuccessful action.
    Failed,
    Aborted,
}

/// Why a command stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    Interpretation { error: InterpretationError },
    ActionFailed { step: usize },
    VerificationDeclined { step: usize },
    Cancelled { step: usize },
}

/// Everything the UI gets back for one command, including on abort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub command_id: Uuid,
    pub source_text: String,
    pub results: Vec<ActionRecord>,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
}

impl CommandOutcome {
    pub fn interpretation_failed(
        command_id: Uuid,
        source_text: impl Into<String>,
        error: InterpretationError,
    ) -> Self {
        Self {
            command_id,
            source_text: source_text.into(),
            results: Vec::new(),
            status: OutcomeStatus::Aborted,
            abort_reason: Some(AbortReason::Interpretation { error }),
        }
    }

    /// Derives the overall status: succeeded iff every entry succeeded,
    /// aborted whenever an abort reason is present.
    pub fn finish(
        command_id: Uuid,
        source_text: impl Into<String>,
        results: Vec<ActionRecord>,
        abort_reason: Option<AbortReason>,
    ) -> Self {
        let status = if abort_reason.is_some() {
            OutcomeStatus::Aborted
        } else if results.iter().all(|r| r.result.is_success()) {
            OutcomeStatus::Succeeded
        } else {
            OutcomeStatus::Failed
        };
        Self {
            command_id,
            source_text: source_text.into(),
            results,
            status,
            abort_reason,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }

    pub fn interpretation_error(&self) -> Option<&InterpretationError> {
        match &self.abort_reason {
            Some(AbortReason::Interpretation { error }) => Some(error),
            _ => None,
        }
    }

    pub fn count(&self, status: ResultStatus) -> usize {
        self.results
            .iter()
            .filter(|r| r.result.status() == status)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn error_present_iff_not_succeeded() {
        assert!(ActionResult::succeeded(None).error().is_none());
        assert!(ActionResult::failed(ErrorKind::Io, "disk full").error().is_some());
        assert!(ActionResult::timed_out("slow").error().is_some());
        assert!(
            ActionResult::skipped(ErrorKind::VerificationDenied, "no")
                .error()
                .is_some()
        );
    }

    #[test]
    fn deserialize_enforces_error_rule() {
        let failed_without_error = r#"{"status":"failed"}"#;
        assert!(serde_json::from_str::<ActionResult>(failed_without_error).is_err());

        let succeeded_with_error =
            r#"{"status":"succeeded","error":{"kind":"io","detail":"disk full"}}"#;
        assert!(serde_json::from_str::<ActionResult>(succeeded_with_error).is_err());

        let failed = ActionResult::failed(ErrorKind::Io, "disk full");
        let json = serde_json::to_string(&failed).unwrap();
        assert_eq!(serde_json::from_str::<ActionResult>(&json).unwrap(), failed);
    }

    #[test]
    fn execution_timeout_becomes_timed_out() {
        let result = ActionResult::from(ExecutionError::Timeout(Duration::from_secs(2)));
        assert_eq!(result.status(), ResultStatus::TimedOut);
        assert_eq!(result.error().unwrap().kind, ErrorKind::Timeout);
        assert!(result.is_failure());
    }

    #[test]
    fn empty_finished_outcome_is_success() {
        let outcome = CommandOutcome::finish(Uuid::new_v4(), "noop", vec![], None);
        assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    }

    #[test]
    fn interpretation_failure_has_no_results() {
        let outcome = CommandOutcome::interpretation_failed(
            Uuid::new_v4(),
            "do the thing",
            InterpretationError::Ambiguous("which thing?".into()),
        );
        assert_eq!(outcome.status, OutcomeStatus::Aborted);
        assert!(outcome.results.is_empty());
        assert!(outcome.interpretation_error().is_some());
    }
}
