//! Command orchestration.
//!
//! One [`Agent`] runs one command at a time:
//!
//! ```text
//! Idle -> Interpreting -> Verifying(i) -> Dispatching(i) -> Logging(i) -> ... -> Done | Aborted
//! ```
//!
//! Actions of a plan run strictly in order. Unless the plan is best-effort,
//! the first failed, timed-out or declined action aborts the command and the
//! remaining actions are reported as skipped without reaching an executor.
//!
//! Cancellation is cooperative. It is observed between actions, while waiting
//! for a confirmation and while backing off between interpreter attempts; an
//! executor that is already running is allowed to finish. Completed actions
//! are never rolled back.

use crate::gate::{Confirmation, PendingConfirmation, Verdict};
use crate::runtime::RuntimeHandle;
use deskpilot_common::{
    AbortReason, Action, ActionRecord, ActionResult, CommandOutcome, ConversationContext,
    ErrorKind, InterpretationError, LogEntry, Plan, ResultStatus, RiskLevel, Turn,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Interpreting,
    Verifying(usize),
    Dispatching(usize),
    Logging(usize),
    Done,
    Aborted,
}

/// Progress of a single plan step, as reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Verifying,
    AwaitingConfirmation,
    Dispatching,
    Finished(ResultStatus),
}

/// UI callbacks. Every method has a default, so observers implement only
/// what they display. The default confirmation answer is a denial.
pub trait AgentObserver: Send + Sync {
    fn on_progress(&self, _step: usize, _action: &Action, _status: StepStatus) {}

    fn request_confirmation(&self, _step: usize, _action: &Action) -> PendingConfirmation {
        PendingConfirmation::denied()
    }

    fn on_command_outcome(&self, _outcome: &CommandOutcome) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl AgentObserver for NoopObserver {}

/// Requests cancellation of the command an agent is currently running.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

enum Interrupted {
    Failed(InterpretationError),
    Cancelled,
}

pub struct Agent {
    runtime: RuntimeHandle,
    observer: Arc<dyn AgentObserver>,
    context: ConversationContext,
    state: AgentState,
    cancel: Arc<watch::Sender<bool>>,
}

impl Agent {
    pub fn new(runtime: RuntimeHandle) -> Self {
        let context = ConversationContext::with_capacity(runtime.agent_config().context_turns);
        let (tx, _rx) = watch::channel(false);
        Self {
            runtime,
            observer: Arc::new(NoopObserver),
            context,
            state: AgentState::Idle,
            cancel: Arc::new(tx),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn AgentObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn clear_context(&mut self) {
        self.context.clear();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel.clone(),
        }
    }

    /// Runs one command to completion. Always returns an outcome describing
    /// what ran, what was skipped and why.
    ///
    /// A cancellation requested before this call starts is discarded.
    pub async fn handle_command(&mut self, text: &str) -> CommandOutcome {
        let command_id = Uuid::new_v4();
        let span = tracing::info_span!("command", %command_id);
        self.run(command_id, text).instrument(span).await
    }

    async fn run(&mut self, command_id: Uuid, text: &str) -> CommandOutcome {
        self.cancel.send_replace(false);
        let mut cancel = self.cancel.subscribe();
        tracing::debug!(text, "command received");

        self.transition(AgentState::Interpreting);
        let outcome = match self.interpret(text, &mut cancel).await {
            Ok(plan) => self.process(command_id, plan, &mut cancel).await,
            Err(Interrupted::Failed(error)) => {
                tracing::info!(%error, "command not interpreted");
                CommandOutcome::interpretation_failed(command_id, text.trim(), error)
            }
            Err(Interrupted::Cancelled) => CommandOutcome::finish(
                command_id,
                text.trim(),
                Vec::new(),
                Some(AbortReason::Cancelled { step: 0 }),
            ),
        };

        self.transition(if outcome.abort_reason.is_some() {
            AgentState::Aborted
        } else {
            AgentState::Done
        });
        tracing::info!(status = ?outcome.status, actions = outcome.results.len(), "command finished");

        self.context.push(Turn {
            text: text.trim().to_string(),
            status: outcome.status,
        });
        self.observer.on_command_outcome(&outcome);
        outcome
    }

    /// Retries transient interpreter failures with exponential backoff.
    async fn interpret(
        &self,
        text: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Plan, Interrupted> {
        let policy = self.runtime.interpreter_config();
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if *cancel.borrow() {
                return Err(Interrupted::Cancelled);
            }
            match self.runtime.interpreter().translate(text, &self.context).await {
                Ok(plan) => {
                    tracing::info!(
                        actions = plan.len(),
                        confidence = plan.confidence(),
                        best_effort = plan.is_best_effort(),
                        attempt,
                        "plan ready"
                    );
                    return Ok(plan);
                }
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = policy.backoff(attempt);
                    tracing::warn!(%error, attempt, max_attempts, ?delay, "interpreter failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancelled(cancel) => return Err(Interrupted::Cancelled),
                    }
                    attempt += 1;
                }
                Err(error) => return Err(Interrupted::Failed(error)),
            }
        }
    }

    async fn process(
        &mut self,
        command_id: Uuid,
        plan: Plan,
        cancel: &mut watch::Receiver<bool>,
    ) -> CommandOutcome {
        let observer = self.observer.clone();
        let mut results = Vec::with_capacity(plan.len());
        let mut abort = None;

        for (step, action) in plan.actions().iter().enumerate() {
            if *cancel.borrow() {
                abort = Some(AbortReason::Cancelled { step });
                break;
            }

            let started = Instant::now();
            self.transition(AgentState::Verifying(step));
            observer.on_progress(step, action, StepStatus::Verifying);

            let declined = match self.runtime.gate().check(action) {
                Verdict::Allow => None,
                Verdict::Deny(reason) => {
                    tracing::info!(kind = %action.kind(), %reason, "action denied by policy");
                    Some(ActionResult::skipped(ErrorKind::VerificationDenied, reason))
                }
                Verdict::RequireConfirmation => {
                    observer.on_progress(step, action, StepStatus::AwaitingConfirmation);
                    let timeout = self.runtime.gate().confirmation_timeout();
                    let pending = observer.request_confirmation(step, action);
                    let answer = tokio::select! {
                        answer = pending.wait(timeout) => answer,
                        _ = cancelled(cancel) => {
                            abort = Some(AbortReason::Cancelled { step });
                            break;
                        }
                    };
                    tracing::info!(kind = %action.kind(), ?answer, "confirmation resolved");
                    match answer {
                        Confirmation::Approved => None,
                        Confirmation::Denied => Some(ActionResult::skipped(
                            ErrorKind::VerificationDenied,
                            "declined by user",
                        )),
                        Confirmation::TimedOut => Some(ActionResult::skipped(
                            ErrorKind::VerificationDenied,
                            format!("no confirmation within {:?}", timeout),
                        )),
                    }
                }
            };

            let result = match declined {
                Some(result) => result,
                None => {
                    self.transition(AgentState::Dispatching(step));
                    observer.on_progress(step, action, StepStatus::Dispatching);
                    self.dispatch(action).await
                }
            };

            self.transition(AgentState::Logging(step));
            self.runtime.logger().record(
                LogEntry::new(plan.source_text(), action.clone(), result.clone(), started.elapsed())
                    .for_step(command_id, step),
            );
            observer.on_progress(step, action, StepStatus::Finished(result.status()));

            let stop = if result.is_failure() {
                Some(AbortReason::ActionFailed { step })
            } else if result.status() == ResultStatus::Skipped {
                Some(AbortReason::VerificationDeclined { step })
            } else {
                None
            };
            results.push(ActionRecord {
                action: action.clone(),
                result,
            });

            if let Some(reason) = stop {
                if plan.is_best_effort() {
                    tracing::info!(step, "best-effort plan continues past unsuccessful action");
                } else {
                    abort = Some(reason);
                    break;
                }
            }
        }

        if let Some(reason) = &abort {
            let (kind, detail) = match reason {
                AbortReason::Cancelled { .. } => (ErrorKind::Cancelled, "command cancelled"),
                _ => (ErrorKind::PlanAborted, "an earlier action did not complete"),
            };
            let processed = results.len();
            for (step, action) in plan.actions().iter().enumerate().skip(processed) {
                observer.on_progress(step, action, StepStatus::Finished(ResultStatus::Skipped));
                results.push(ActionRecord {
                    action: action.clone(),
                    result: ActionResult::skipped(kind, detail),
                });
            }
        }

        CommandOutcome::finish(command_id, plan.source_text(), results, abort)
    }

    async fn dispatch(&self, action: &Action) -> ActionResult {
        let executor = match self.runtime.registry().resolve(action.kind()) {
            Ok(executor) => executor,
            Err(e) => return ActionResult::failed(ErrorKind::Unsupported, e.to_string()),
        };

        let config = self.runtime.agent_config();
        let deadline = config.action_timeout();
        let retries = if action.risk_level() < RiskLevel::High {
            config.dispatch_retries
        } else {
            0
        };

        let mut result = executor.execute(action, deadline).await;
        let mut attempt = 0;
        while result.status() == ResultStatus::TimedOut && attempt < retries {
            attempt += 1;
            tracing::warn!(kind = %action.kind(), attempt, retries, "action timed out, retrying");
            result = executor.execute(action, deadline).await;
        }

        tracing::info!(
            executor = executor.name(),
            kind = %action.kind(),
            risk = %action.risk_level(),
            status = ?result.status(),
            "action dispatched"
        );
        result
    }

    fn transition(&mut self, next: AgentState) {
        tracing::debug!(from = ?self.state, to = ?next, "agent state");
        self.state = next;
    }
}

/// Resolves once cancellation is requested.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
