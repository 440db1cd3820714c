//! Agent orchestration tests.
//!
//! The interpreter backend and the input executor are replaced by mocks that
//! count their calls, so each test can assert exactly which actions reached
//! an executor and in what order.

use async_trait::async_trait;
use deskpilot_common::{
    AbortReason, Action, ActionKind, ConversationContext, ErrorKind, ExecutionError,
    InterpretationError, OutcomeStatus, ResultStatus, RiskLevel,
};
use deskpilot_engine::config::{DeskpilotConfig, InputDeviceKind};
use deskpilot_engine::executor::Executor;
use deskpilot_engine::interpreter::{ActionDraft, InferenceBackend, PlanDraft};
use deskpilot_engine::logger::MemoryActionLogger;
use deskpilot_engine::{
    Agent, AgentObserver, AgentState, ConfirmationResponder, PendingConfirmation, RuntimeBuilder,
    RuntimeHandle,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Translation = Result<PlanDraft, InterpretationError>;

/// Replays scripted translations, then repeats `fallback` forever.
struct ScriptedBackend {
    script: Mutex<VecDeque<Translation>>,
    fallback: Translation,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn returning(draft: PlanDraft) -> Arc<Self> {
        Self::scripted(vec![], Ok(draft))
    }

    fn failing(error: InterpretationError) -> Arc<Self> {
        Self::scripted(vec![], Err(error))
    }

    fn scripted(script: Vec<Translation>, fallback: Translation) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn translate(
        &self,
        _text: &str,
        _context: &ConversationContext,
        _timeout: Duration,
    ) -> Result<PlanDraft, InterpretationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Stands in for the input executor and records every dispatch.
#[derive(Default)]
struct TrackingInput {
    calls: AtomicUsize,
    performed: Mutex<Vec<ActionKind>>,
    fail_on: Option<ActionKind>,
    /// The first `hang_calls` dispatches never finish on their own.
    hang_calls: usize,
    delay: Duration,
}

impl TrackingInput {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn performed(&self) -> Vec<ActionKind> {
        self.performed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for TrackingInput {
    fn name(&self) -> &'static str {
        "tracking-input"
    }

    fn supported_kinds(&self) -> &'static [ActionKind] {
        &[
            ActionKind::MouseMove,
            ActionKind::MouseClick,
            ActionKind::Scroll,
            ActionKind::KeyPress,
            ActionKind::TypeText,
        ]
    }

    async fn perform(&self, action: &Action) -> Result<Option<Value>, ExecutionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.performed.lock().unwrap().push(action.kind());
        if call < self.hang_calls {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_on == Some(action.kind()) {
            return Err(ExecutionError::TargetNotFound("focused window".into()));
        }
        Ok(None)
    }
}

/// Stands in for the application executor; never launches anything.
#[derive(Default)]
struct TrackingApps {
    calls: AtomicUsize,
    /// The first `hang_calls` dispatches never finish on their own.
    hang_calls: usize,
}

impl TrackingApps {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for TrackingApps {
    fn name(&self) -> &'static str {
        "tracking-apps"
    }

    fn supported_kinds(&self) -> &'static [ActionKind] {
        &[ActionKind::OpenApp, ActionKind::CloseApp, ActionKind::SwitchApp]
    }

    async fn perform(&self, _action: &Action) -> Result<Option<Value>, ExecutionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.hang_calls {
            std::future::pending::<()>().await;
        }
        Ok(None)
    }
}

/// Approves or denies every confirmation request.
struct FixedAnswer(bool);

impl AgentObserver for FixedAnswer {
    fn request_confirmation(&self, _step: usize, _action: &Action) -> PendingConfirmation {
        PendingConfirmation::resolved(self.0)
    }
}

/// Holds on to the responders and never answers.
#[derive(Default)]
struct SilentUser {
    pending: Mutex<Vec<ConfirmationResponder>>,
}

impl AgentObserver for SilentUser {
    fn request_confirmation(&self, _step: usize, _action: &Action) -> PendingConfirmation {
        let (responder, pending) = PendingConfirmation::channel();
        self.pending.lock().unwrap().push(responder);
        pending
    }
}

fn test_config() -> DeskpilotConfig {
    let mut config = DeskpilotConfig::default();
    config.interpreter.initial_backoff_ms = 1;
    config.interpreter.max_backoff_ms = 4;
    config.input.device = InputDeviceKind::Recording;
    config
}

fn runtime(
    config: DeskpilotConfig,
    backend: Arc<ScriptedBackend>,
    input: Arc<TrackingInput>,
    logger: &MemoryActionLogger,
) -> RuntimeHandle {
    RuntimeBuilder::new(config)
        .backend(backend)
        .executor(input)
        .logger(Arc::new(logger.clone()))
        .build()
        .unwrap()
}

fn runtime_with_apps(
    config: DeskpilotConfig,
    backend: Arc<ScriptedBackend>,
    apps: Arc<TrackingApps>,
    logger: &MemoryActionLogger,
) -> RuntimeHandle {
    RuntimeBuilder::new(config)
        .backend(backend)
        .executor(apps)
        .logger(Arc::new(logger.clone()))
        .build()
        .unwrap()
}

fn three_step_draft() -> PlanDraft {
    PlanDraft::new(vec![
        ActionDraft::new(ActionKind::MouseMove).param("x", 10).param("y", 20),
        ActionDraft::new(ActionKind::KeyPress).param("key", "ctrl+s"),
        ActionDraft::new(ActionKind::TypeText).param("text", "hello"),
    ])
}

fn delete_draft(path: &Path) -> PlanDraft {
    PlanDraft::new(vec![
        ActionDraft::new(ActionKind::DeleteFile).param("path", path.to_string_lossy().into_owned()),
    ])
}

#[tokio::test]
async fn actions_run_in_plan_order() {
    let backend = ScriptedBackend::returning(three_step_draft());
    let input = Arc::new(TrackingInput::default());
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(test_config(), backend, input.clone(), &logger));

    let outcome = agent.handle_command("move to 10,20 then save then type hello").await;

    assert_eq!(outcome.status, OutcomeStatus::Succeeded);
    assert_eq!(outcome.count(ResultStatus::Succeeded), 3);
    assert_eq!(
        input.performed(),
        vec![ActionKind::MouseMove, ActionKind::KeyPress, ActionKind::TypeText]
    );
    assert_eq!(agent.state(), AgentState::Done);

    let entries = logger.entries();
    assert_eq!(entries.len(), 3);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.step, Some(i));
        assert_eq!(entry.command_id, Some(outcome.command_id));
    }
}

#[tokio::test]
async fn ambiguous_command_dispatches_nothing() {
    let backend = ScriptedBackend::failing(InterpretationError::Ambiguous("which file?".into()));
    let input = Arc::new(TrackingInput::default());
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(test_config(), backend.clone(), input.clone(), &logger));

    let outcome = agent.handle_command("delete it").await;

    assert_eq!(outcome.status, OutcomeStatus::Aborted);
    assert!(matches!(
        outcome.interpretation_error(),
        Some(InterpretationError::Ambiguous(_))
    ));
    assert!(outcome.results.is_empty());
    assert_eq!(backend.calls(), 1, "terminal errors are not retried");
    assert_eq!(input.calls(), 0);
    assert!(logger.entries().is_empty());
    assert_eq!(agent.state(), AgentState::Aborted);
}

#[tokio::test]
async fn empty_command_is_rejected_before_the_backend() {
    let backend = ScriptedBackend::returning(three_step_draft());
    let input = Arc::new(TrackingInput::default());
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(test_config(), backend.clone(), input, &logger));

    let outcome = agent.handle_command("   ").await;

    assert_eq!(
        outcome.interpretation_error(),
        Some(&InterpretationError::EmptyCommand)
    );
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn failure_skips_the_rest_of_the_plan() {
    let backend = ScriptedBackend::returning(three_step_draft());
    let input = Arc::new(TrackingInput {
        fail_on: Some(ActionKind::KeyPress),
        ..Default::default()
    });
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(test_config(), backend, input.clone(), &logger));

    let outcome = agent.handle_command("move then save then type").await;

    let statuses: Vec<_> = outcome.results.iter().map(|r| r.result.status()).collect();
    assert_eq!(
        statuses,
        vec![ResultStatus::Succeeded, ResultStatus::Failed, ResultStatus::Skipped]
    );
    assert_eq!(
        outcome.results[1].result.error().unwrap().kind,
        ErrorKind::TargetNotFound
    );
    assert_eq!(
        outcome.results[2].result.error().unwrap().kind,
        ErrorKind::PlanAborted
    );
    assert_eq!(outcome.abort_reason, Some(AbortReason::ActionFailed { step: 1 }));
    assert_eq!(input.calls(), 2, "the skipped action never reached an executor");
    assert_eq!(logger.entries().len(), 2);
}

#[tokio::test]
async fn best_effort_plan_continues_past_failures() {
    let mut draft = three_step_draft();
    draft.best_effort = true;
    let backend = ScriptedBackend::returning(draft);
    let input = Arc::new(TrackingInput {
        fail_on: Some(ActionKind::KeyPress),
        ..Default::default()
    });
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(test_config(), backend, input.clone(), &logger));

    let outcome = agent.handle_command("move then save then type, keep going").await;

    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(outcome.abort_reason, None);
    assert_eq!(input.calls(), 3);
    assert_eq!(outcome.count(ResultStatus::Succeeded), 2);
    assert_eq!(outcome.count(ResultStatus::Failed), 1);
}

#[tokio::test]
async fn transient_backend_errors_are_retried() {
    let backend = ScriptedBackend::scripted(
        vec![
            Err(InterpretationError::BackendUnavailable("connection refused".into())),
            Err(InterpretationError::timeout(Duration::from_secs(10))),
        ],
        Ok(three_step_draft()),
    );
    let input = Arc::new(TrackingInput::default());
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(test_config(), backend.clone(), input.clone(), &logger));

    let outcome = agent.handle_command("move then save then type").await;

    assert!(outcome.is_success());
    assert_eq!(backend.calls(), 3);
    assert_eq!(input.calls(), 3);
}

#[tokio::test]
async fn retries_stop_after_max_attempts() {
    let backend =
        ScriptedBackend::failing(InterpretationError::timeout(Duration::from_secs(10)));
    let input = Arc::new(TrackingInput::default());
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(test_config(), backend.clone(), input.clone(), &logger));

    let outcome = agent.handle_command("open the thing").await;

    assert_eq!(backend.calls(), 3);
    assert!(matches!(
        outcome.interpretation_error(),
        Some(InterpretationError::Timeout { .. })
    ));
    assert_eq!(input.calls(), 0);
}

#[tokio::test]
async fn sandboxed_delete_runs_without_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("notes.txt");
    std::fs::write(&target, "scratch").unwrap();

    let mut config = test_config();
    config.verification.sandbox_roots = vec![dir.path().to_path_buf()];
    let backend = ScriptedBackend::returning(delete_draft(&target));
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(
        config,
        backend,
        Arc::new(TrackingInput::default()),
        &logger,
    ));

    let outcome = agent.handle_command("delete notes.txt").await;

    assert!(outcome.is_success(), "{:?}", outcome);
    assert!(!target.exists());
}

#[tokio::test]
async fn unconfirmed_delete_leaves_the_file_alone() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("report.txt");
    std::fs::write(&target, "keep me").unwrap();

    let backend = ScriptedBackend::returning(delete_draft(&target));
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(
        test_config(),
        backend,
        Arc::new(TrackingInput::default()),
        &logger,
    ));

    let outcome = agent.handle_command("delete report.txt").await;

    assert_eq!(outcome.status, OutcomeStatus::Aborted);
    assert_eq!(
        outcome.abort_reason,
        Some(AbortReason::VerificationDeclined { step: 0 })
    );
    let result = &outcome.results[0].result;
    assert_eq!(result.status(), ResultStatus::Skipped);
    assert_eq!(result.error().unwrap().kind, ErrorKind::VerificationDenied);
    assert!(target.exists());
    assert_eq!(logger.entries().len(), 1, "declined actions are still logged");
}

#[tokio::test]
async fn approved_delete_is_dispatched() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("old.log");
    std::fs::write(&target, "").unwrap();

    let backend = ScriptedBackend::returning(delete_draft(&target));
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(
        test_config(),
        backend,
        Arc::new(TrackingInput::default()),
        &logger,
    ))
    .with_observer(Arc::new(FixedAnswer(true)));

    let outcome = agent.handle_command("delete old.log").await;

    assert!(outcome.is_success());
    assert!(!target.exists());
}

#[tokio::test]
async fn unanswered_confirmation_times_out_as_denial() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("data.csv");
    std::fs::write(&target, "a,b").unwrap();

    let mut config = test_config();
    config.verification.confirmation_timeout_ms = 20;
    let backend = ScriptedBackend::returning(delete_draft(&target));
    let logger = MemoryActionLogger::new();
    let observer = Arc::new(SilentUser::default());
    let mut agent = Agent::new(runtime(
        config,
        backend,
        Arc::new(TrackingInput::default()),
        &logger,
    ))
    .with_observer(observer.clone());

    let outcome = agent.handle_command("delete data.csv").await;

    assert_eq!(outcome.results[0].result.status(), ResultStatus::Skipped);
    assert_eq!(observer.pending.lock().unwrap().len(), 1);
    assert!(target.exists());
}

#[tokio::test]
async fn deny_listed_kind_is_never_dispatched() {
    let mut config = test_config();
    config.verification.deny_kinds = vec![ActionKind::TypeText];
    let backend = ScriptedBackend::returning(three_step_draft());
    let input = Arc::new(TrackingInput::default());
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(config, backend, input.clone(), &logger))
        .with_observer(Arc::new(FixedAnswer(true)));

    let outcome = agent.handle_command("move then save then type").await;

    assert_eq!(
        outcome.abort_reason,
        Some(AbortReason::VerificationDeclined { step: 2 })
    );
    assert_eq!(input.performed(), vec![ActionKind::MouseMove, ActionKind::KeyPress]);
}

#[tokio::test]
async fn hung_executor_times_out() {
    let mut config = test_config();
    config.agent.action_timeout_ms = 20;
    let backend = ScriptedBackend::returning(three_step_draft());
    let input = Arc::new(TrackingInput {
        hang_calls: 1,
        ..Default::default()
    });
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(config, backend, input.clone(), &logger));

    let outcome = agent.handle_command("move then save then type").await;

    assert_eq!(outcome.results[0].result.status(), ResultStatus::TimedOut);
    assert_eq!(outcome.abort_reason, Some(AbortReason::ActionFailed { step: 0 }));
    assert_eq!(input.calls(), 1);
}

#[tokio::test]
async fn timed_out_low_risk_action_is_retried() {
    let mut config = test_config();
    config.agent.action_timeout_ms = 20;
    config.agent.dispatch_retries = 1;
    let backend = ScriptedBackend::returning(three_step_draft());
    let input = Arc::new(TrackingInput {
        hang_calls: 1,
        ..Default::default()
    });
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(config, backend, input.clone(), &logger));

    let outcome = agent.handle_command("move then save then type").await;

    assert!(outcome.is_success());
    assert_eq!(input.calls(), 4);
}

#[tokio::test]
async fn timed_out_high_risk_action_is_not_retried() {
    let mut config = test_config();
    config.agent.action_timeout_ms = 20;
    config.agent.dispatch_retries = 1;
    let backend = ScriptedBackend::returning(PlanDraft::new(vec![
        ActionDraft::new(ActionKind::CloseApp)
            .param("name", "gedit")
            .param("force", true),
    ]));
    let apps = Arc::new(TrackingApps {
        hang_calls: 1,
        ..Default::default()
    });
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime_with_apps(config, backend, apps.clone(), &logger))
        .with_observer(Arc::new(FixedAnswer(true)));

    let outcome = agent.handle_command("kill gedit").await;

    assert_eq!(outcome.results[0].action.risk_level(), RiskLevel::High);
    assert_eq!(outcome.results[0].result.status(), ResultStatus::TimedOut);
    assert_eq!(apps.calls(), 1);
}

#[tokio::test]
async fn launching_a_command_with_arguments_needs_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("precious.txt");
    std::fs::write(&target, "keep").unwrap();
    let args = format!("-f {}", target.display());
    let backend = ScriptedBackend::returning(PlanDraft::new(vec![
        ActionDraft::new(ActionKind::OpenApp)
            .param("name", "rm")
            .param("args", args.as_str()),
    ]));
    let apps = Arc::new(TrackingApps::default());
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime_with_apps(test_config(), backend, apps.clone(), &logger))
        .with_observer(Arc::new(FixedAnswer(false)));

    let outcome = agent
        .handle_command(&format!("run rm with args \"{}\"", args))
        .await;

    assert_eq!(outcome.results[0].action.risk_level(), RiskLevel::High);
    assert_eq!(
        outcome.abort_reason,
        Some(AbortReason::VerificationDeclined { step: 0 })
    );
    assert_eq!(apps.calls(), 0);
    assert!(target.exists());
}

#[tokio::test]
async fn cancellation_stops_at_the_next_action_boundary() {
    let backend = ScriptedBackend::returning(three_step_draft());
    let input = Arc::new(TrackingInput {
        delay: Duration::from_millis(100),
        ..Default::default()
    });
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(test_config(), backend, input.clone(), &logger));

    let cancel = agent.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
    });
    let outcome = agent.handle_command("move then save then type").await;

    assert_eq!(outcome.status, OutcomeStatus::Aborted);
    assert_eq!(outcome.abort_reason, Some(AbortReason::Cancelled { step: 1 }));
    assert_eq!(
        outcome.results[0].result.status(),
        ResultStatus::Succeeded,
        "the running action finishes"
    );
    assert_eq!(
        outcome.results[2].result.error().unwrap().kind,
        ErrorKind::Cancelled
    );
    assert_eq!(input.calls(), 1);
    assert_eq!(logger.entries().len(), 1);
}

#[tokio::test]
async fn cancellation_interrupts_a_pending_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("a.txt");
    std::fs::write(&target, "").unwrap();

    let backend = ScriptedBackend::returning(delete_draft(&target));
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(
        test_config(),
        backend,
        Arc::new(TrackingInput::default()),
        &logger,
    ))
    .with_observer(Arc::new(SilentUser::default()));

    let cancel = agent.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let outcome = tokio::time::timeout(Duration::from_secs(5), agent.handle_command("delete a.txt"))
        .await
        .expect("cancel must not wait for the confirmation timeout");

    assert_eq!(outcome.abort_reason, Some(AbortReason::Cancelled { step: 0 }));
    assert!(target.exists());
    assert!(logger.entries().is_empty());
}

#[tokio::test]
async fn context_keeps_recent_turns() {
    let mut config = test_config();
    config.agent.context_turns = 2;
    let backend = ScriptedBackend::returning(three_step_draft());
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(
        config,
        backend,
        Arc::new(TrackingInput::default()),
        &logger,
    ));

    for text in ["first", "second", "third"] {
        agent.handle_command(text).await;
    }

    let texts: Vec<_> = agent.context().turns().map(|t| t.text.clone()).collect();
    assert_eq!(texts, vec!["second", "third"]);
    agent.clear_context();
    assert!(agent.context().is_empty());
}

#[tokio::test]
async fn secret_text_is_redacted_in_the_log() {
    let draft = PlanDraft::new(vec![
        ActionDraft::new(ActionKind::TypeText)
            .param("text", "hunter2")
            .param("secret", true),
    ]);
    let backend = ScriptedBackend::returning(draft);
    let logger = MemoryActionLogger::new();
    let mut agent = Agent::new(runtime(
        test_config(),
        backend,
        Arc::new(TrackingInput::default()),
        &logger,
    ));

    let outcome = agent.handle_command("type the password hunter2").await;
    assert!(outcome.is_success());

    let entry = &logger.entries()[0];
    assert_eq!(entry.action.text("text"), Some("***"));
    assert!(!entry.source_text.contains("hunter2"));
    assert_eq!(
        outcome.results[0].action.text("text"),
        Some("hunter2"),
        "only the log is redacted"
    );
}
