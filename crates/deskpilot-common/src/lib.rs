pub mod action;
pub mod error;
pub mod formatter;
pub mod log;
pub mod outcome;
pub mod plan;
pub mod risk;
pub mod schema;

pub use action::{Action, ActionKind, ExecutorCategory, ParamValue, Parameters, REDACTED, param_map};
pub use error::{ExecutionError, InterpretationError};
pub use log::{LogEntry, TimeRange};
pub use outcome::{
    AbortReason, ActionRecord, ActionResult, CommandOutcome, ErrorKind, InconsistentResult,
    OutcomeStatus, ResultError, ResultStatus,
};
pub use plan::{ConversationContext, Plan, Turn};
pub use risk::{RiskClassifier, RiskLevel};
