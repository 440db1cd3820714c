use super::Executor;
use async_trait::async_trait;
use deskpilot_common::{Action, ActionKind, ExecutionError};
use serde_json::{Value, json};
use std::process::Stdio;
use std::sync::Arc;

/// Application lifecycle operations. Names are matched as the OS knows them
/// (process / window names).
#[async_trait]
pub trait AppController: Send + Sync {
    /// Launches the application, returning its process id when known.
    async fn open(&self, name: &str, args: &[String]) -> Result<Option<u32>, ExecutionError>;

    async fn close(&self, name: &str, force: bool) -> Result<(), ExecutionError>;

    /// Brings the application's window to the foreground.
    async fn focus(&self, name: &str) -> Result<(), ExecutionError>;
}

pub struct AppExecutor {
    controller: Arc<dyn AppController>,
}

impl AppExecutor {
    pub fn new(controller: impl AppController + 'static) -> Self {
        Self {
            controller: Arc::new(controller),
        }
    }

    pub fn with_shared(controller: Arc<dyn AppController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl Executor for AppExecutor {
    fn name(&self) -> &'static str {
        "application"
    }

    fn supported_kinds(&self) -> &'static [ActionKind] {
        &[
            ActionKind::OpenApp,
            ActionKind::CloseApp,
            ActionKind::SwitchApp,
        ]
    }

    async fn perform(&self, action: &Action) -> Result<Option<Value>, ExecutionError> {
        let name = action.text("name").unwrap_or_default();
        match action.kind() {
            ActionKind::OpenApp => {
                let args: Vec<String> = action
                    .text("args")
                    .map(|a| a.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default();
                let pid = self.controller.open(name, &args).await?;
                tracing::info!(app = name, ?pid, "application launched");
                Ok(Some(json!({ "app": name, "pid": pid })))
            }
            ActionKind::CloseApp => {
                let force = action.flag("force");
                self.controller.close(name, force).await?;
                tracing::info!(app = name, force, "application closed");
                Ok(Some(json!({ "app": name })))
            }
            ActionKind::SwitchApp => {
                self.controller.focus(name).await?;
                Ok(Some(json!({ "app": name })))
            }
            other => Err(ExecutionError::Unsupported(format!(
                "{} is not an application action",
                other
            ))),
        }
    }
}

/// Controls applications through the process table: launches binaries
/// directly, closes with `pkill` and focuses windows with `wmctrl`.
#[derive(Debug, Default)]
pub struct SystemAppController;

impl SystemAppController {
    async fn run_helper(program: &str, args: &[&str]) -> Result<bool, ExecutionError> {
        let status = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ExecutionError::Unsupported(format!("{} is not installed", program))
                }
                _ => ExecutionError::Io(format!("{}: {}", program, e)),
            })?;
        Ok(status.success())
    }
}

#[async_trait]
impl AppController for SystemAppController {
    async fn open(&self, name: &str, args: &[String]) -> Result<Option<u32>, ExecutionError> {
        let child = tokio::process::Command::new(name)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ExecutionError::from_io(e, &format!("application '{}'", name)))?;
        Ok(child.id())
    }

    async fn close(&self, name: &str, force: bool) -> Result<(), ExecutionError> {
        let mut args = Vec::with_capacity(3);
        if force {
            args.push("-9");
        }
        args.extend(["-x", name]);

        if Self::run_helper("pkill", &args).await? {
            Ok(())
        } else {
            Err(ExecutionError::TargetNotFound(format!(
                "no running application '{}'",
                name
            )))
        }
    }

    async fn focus(&self, name: &str) -> Result<(), ExecutionError> {
        if Self::run_helper("wmctrl", &["-a", name]).await? {
            Ok(())
        } else {
            Err(ExecutionError::TargetNotFound(format!(
                "no window for application '{}'",
                name
            )))
        }
    }
}
