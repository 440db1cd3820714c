//! Executors perform one category of actions against the OS.
//!
//! All executors share one contract: take an [`Action`] of a kind they
//! declared, return an [`ActionResult`] within the deadline, and never let a
//! failure escape. Implementors only write [`Executor::perform`]; the
//! provided [`Executor::execute`] enforces the rest.

pub mod app;
pub mod dry_run;
pub mod file;
pub mod input;

use async_trait::async_trait;
use deskpilot_common::{Action, ActionKind, ActionResult, ErrorKind, ExecutionError};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

pub use app::{AppController, AppExecutor, SystemAppController};
pub use dry_run::DryRunExecutor;
pub use file::FileExecutor;
pub use input::{
    InputDevice, InputEvent, InputExecutor, RecordingDevice, SharedInputDevice, XdotoolDevice,
    shared_device,
};

#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    fn supported_kinds(&self) -> &'static [ActionKind];

    /// Performs the action. Errors are folded into the result by `execute`.
    async fn perform(&self, action: &Action) -> Result<Option<Value>, ExecutionError>;

    async fn execute(&self, action: &Action, deadline: Duration) -> ActionResult {
        if !self.supported_kinds().contains(&action.kind()) {
            return ExecutionError::Unsupported(format!(
                "{} executor cannot perform {}",
                self.name(),
                action.kind()
            ))
            .into();
        }

        let work = AssertUnwindSafe(self.perform(action)).catch_unwind();
        match tokio::time::timeout(deadline, work).await {
            Ok(Ok(Ok(output))) => ActionResult::succeeded(output),
            Ok(Ok(Err(err))) => err.into(),
            Ok(Err(_)) => {
                tracing::error!(executor = self.name(), kind = %action.kind(), "executor panicked");
                ActionResult::failed(ErrorKind::Io, format!("{} executor panicked", self.name()))
            }
            Err(_) => ExecutionError::Timeout(deadline).into(),
        }
    }
}
