use async_trait::async_trait;
use deskpilot_common::{
    Action, ActionKind, ErrorKind, ExecutionError, ParamValue, Parameters, ResultStatus,
    RiskClassifier, param_map,
};
use deskpilot_engine::executor::{
    AppController, AppExecutor, DryRunExecutor, Executor, FileExecutor, InputEvent, InputExecutor,
    RecordingDevice, shared_device,
};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEADLINE: Duration = Duration::from_secs(5);

fn action(kind: ActionKind, params: Parameters) -> Action {
    Action::new(kind, params, &RiskClassifier::default()).unwrap()
}

fn path_param(path: &Path) -> ParamValue {
    path.to_string_lossy().into_owned().into()
}

// --- file ---

#[tokio::test]
async fn create_then_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.txt");
    let files = FileExecutor::new();

    let create = action(
        ActionKind::CreateFile,
        param_map([("path", path_param(&path)), ("content", "hi there".into())]),
    );
    assert!(files.execute(&create, DEADLINE).await.is_success());

    let read = action(ActionKind::ReadFile, param_map([("path", path_param(&path))]));
    let result = files.execute(&read, DEADLINE).await;
    assert_eq!(result.output().unwrap()["content"], "hi there");

    let again = files.execute(&create, DEADLINE).await;
    assert_eq!(again.status(), ResultStatus::Failed, "create never overwrites");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "hi there");
}

#[tokio::test]
async fn reads_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.txt");
    std::fs::write(&path, "same").unwrap();
    let files = FileExecutor::new();
    let read = action(ActionKind::ReadFile, param_map([("path", path_param(&path))]));

    let first = files.execute(&read, DEADLINE).await;
    let second = files.execute(&read, DEADLINE).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn write_and_append() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.txt");
    let files = FileExecutor::new();

    let write = action(
        ActionKind::WriteFile,
        param_map([("path", path_param(&path)), ("content", "one\n".into())]),
    );
    let append = action(
        ActionKind::WriteFile,
        param_map([
            ("path", path_param(&path)),
            ("content", "two\n".into()),
            ("append", true.into()),
        ]),
    );
    assert!(files.execute(&write, DEADLINE).await.is_success());
    assert!(files.execute(&append, DEADLINE).await.is_success());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");

    assert!(files.execute(&write, DEADLINE).await.is_success());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\n");
}

#[tokio::test]
async fn missing_file_is_target_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let files = FileExecutor::new();
    let delete = action(
        ActionKind::DeleteFile,
        param_map([("path", path_param(&dir.path().join("ghost.txt")))]),
    );

    let result = files.execute(&delete, DEADLINE).await;
    assert_eq!(result.status(), ResultStatus::Failed);
    assert_eq!(result.error().unwrap().kind, ErrorKind::TargetNotFound);
}

#[tokio::test]
async fn delete_refuses_directories() {
    let dir = tempfile::tempdir().unwrap();
    let files = FileExecutor::new();
    let delete = action(ActionKind::DeleteFile, param_map([("path", path_param(dir.path()))]));

    let result = files.execute(&delete, DEADLINE).await;
    assert_eq!(result.error().unwrap().kind, ErrorKind::Unsupported);
    assert!(dir.path().exists());
}

#[tokio::test]
async fn move_does_not_replace_existing_destination() {
    let dir = tempfile::tempdir().unwrap();
    let from = dir.path().join("a.txt");
    let to = dir.path().join("b.txt");
    std::fs::write(&from, "a").unwrap();
    std::fs::write(&to, "b").unwrap();
    let files = FileExecutor::new();

    let mv = action(
        ActionKind::MoveFile,
        param_map([("from", path_param(&from)), ("to", path_param(&to))]),
    );
    assert_eq!(files.execute(&mv, DEADLINE).await.status(), ResultStatus::Failed);
    assert_eq!(std::fs::read_to_string(&to).unwrap(), "b");

    std::fs::remove_file(&to).unwrap();
    assert!(files.execute(&mv, DEADLINE).await.is_success());
    assert!(!from.exists());
    assert_eq!(std::fs::read_to_string(&to).unwrap(), "a");
}

#[tokio::test]
async fn list_is_sorted_and_filtered() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.txt", "a.txt", "c.md"] {
        std::fs::write(dir.path().join(name), "").unwrap();
    }
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    let files = FileExecutor::new();

    let all = action(ActionKind::ListDirectory, param_map([("path", path_param(dir.path()))]));
    let result = files.execute(&all, DEADLINE).await;
    let names: Vec<&str> = result.output().unwrap()["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a.txt", "b.txt", "c.md", "sub"]);

    let txt = action(
        ActionKind::ListDirectory,
        param_map([("path", path_param(dir.path())), ("pattern", "*.txt".into())]),
    );
    let result = files.execute(&txt, DEADLINE).await;
    assert_eq!(result.output().unwrap()["entries"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn oversized_read_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.bin");
    std::fs::write(&path, vec![b'x'; 64]).unwrap();
    let files = FileExecutor::new().with_max_read_bytes(16);

    let read = action(ActionKind::ReadFile, param_map([("path", path_param(&path))]));
    let result = files.execute(&read, DEADLINE).await;
    assert_eq!(result.error().unwrap().kind, ErrorKind::Unsupported);
}

#[tokio::test]
async fn wrong_kind_is_unsupported() {
    let files = FileExecutor::new();
    let mv = action(ActionKind::MouseMove, param_map([("x", 1i64.into()), ("y", 2i64.into())]));

    let result = files.execute(&mv, DEADLINE).await;
    assert_eq!(result.error().unwrap().kind, ErrorKind::Unsupported);
}

// --- input ---

#[tokio::test]
async fn click_at_position_moves_first() {
    let device = RecordingDevice::new();
    let input = InputExecutor::new(device.clone());
    let click = action(
        ActionKind::MouseClick,
        param_map([("x", 5i64.into()), ("y", 7i64.into()), ("count", 2i64.into())]),
    );

    assert!(input.execute(&click, DEADLINE).await.is_success());
    let events = device.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], InputEvent::Move { x: 5, y: 7 });
    assert!(matches!(events[1], InputEvent::Click { count: 2, .. }));
}

#[tokio::test]
async fn concurrent_plans_do_not_interleave_input() {
    let device = RecordingDevice::new();
    let shared = shared_device(device.clone());
    let first = Arc::new(InputExecutor::with_shared(shared.clone()));
    let second = Arc::new(InputExecutor::with_shared(shared));

    let a = action(
        ActionKind::MouseClick,
        param_map([("x", 1i64.into()), ("y", 1i64.into())]),
    );
    let b = action(
        ActionKind::MouseClick,
        param_map([("x", 2i64.into()), ("y", 2i64.into())]),
    );

    let mut tasks = Vec::new();
    for i in 0..8 {
        let (executor, action) = if i % 2 == 0 {
            (first.clone(), a.clone())
        } else {
            (second.clone(), b.clone())
        };
        tasks.push(tokio::spawn(async move {
            executor.execute(&action, DEADLINE).await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_success());
    }

    // Every click directly follows the move of the same action.
    let events = device.events();
    assert_eq!(events.len(), 16);
    for pair in events.chunks(2) {
        assert!(matches!(pair[0], InputEvent::Move { .. }));
        assert!(matches!(pair[1], InputEvent::Click { .. }));
    }
}

#[tokio::test]
async fn bad_key_combo_fails_without_sending() {
    let device = RecordingDevice::new();
    let input = InputExecutor::new(device.clone());
    let key = action(ActionKind::KeyPress, param_map([("key", "ctrl+".into())]));

    let result = input.execute(&key, DEADLINE).await;
    assert_eq!(result.status(), ResultStatus::Failed);
    assert!(device.events().is_empty());
}

// --- applications ---

#[derive(Default)]
struct FakeApps {
    running: Mutex<Vec<String>>,
    focus_calls: AtomicUsize,
}

#[async_trait]
impl AppController for FakeApps {
    async fn open(&self, name: &str, _args: &[String]) -> Result<Option<u32>, ExecutionError> {
        self.running.lock().unwrap().push(name.to_string());
        Ok(Some(4242))
    }

    async fn close(&self, name: &str, _force: bool) -> Result<(), ExecutionError> {
        let mut running = self.running.lock().unwrap();
        let before = running.len();
        running.retain(|app| app != name);
        if running.len() == before {
            return Err(ExecutionError::TargetNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn focus(&self, _name: &str) -> Result<(), ExecutionError> {
        self.focus_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn app_lifecycle_goes_through_the_controller() {
    let apps = Arc::new(FakeApps::default());
    let executor = AppExecutor::with_shared(apps.clone());
    let open = action(ActionKind::OpenApp, param_map([("name", "gedit".into())]));
    let switch = action(ActionKind::SwitchApp, param_map([("name", "gedit".into())]));
    let close = action(ActionKind::CloseApp, param_map([("name", "gedit".into())]));

    let opened = executor.execute(&open, DEADLINE).await;
    assert_eq!(opened.output().unwrap()["pid"], 4242);
    assert!(executor.execute(&switch, DEADLINE).await.is_success());
    assert!(executor.execute(&close, DEADLINE).await.is_success());
    assert_eq!(apps.focus_calls.load(Ordering::SeqCst), 1);

    let again = executor.execute(&close, DEADLINE).await;
    assert_eq!(again.error().unwrap().kind, ErrorKind::TargetNotFound);
}

// --- contract ---

struct Panicking;

#[async_trait]
impl Executor for Panicking {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn supported_kinds(&self) -> &'static [ActionKind] {
        &[ActionKind::Scroll]
    }

    async fn perform(&self, _action: &Action) -> Result<Option<Value>, ExecutionError> {
        panic!("driver bug");
    }
}

#[tokio::test]
async fn panics_become_failed_results() {
    let scroll = action(ActionKind::Scroll, param_map([("dy", 3i64.into())]));
    let result = Panicking.execute(&scroll, DEADLINE).await;
    assert_eq!(result.status(), ResultStatus::Failed);
}

#[tokio::test]
async fn dry_run_performs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("never.txt");
    let dry = DryRunExecutor::new();
    let create = action(ActionKind::CreateFile, param_map([("path", path_param(&path))]));

    let result = dry.execute(&create, DEADLINE).await;
    assert_eq!(result.output().unwrap()["dry_run"], true);
    assert!(!path.exists());
    assert_eq!(dry.performed(), vec![create]);
}
