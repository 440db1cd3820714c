//! Mouse and keyboard emulation.
//!
//! One input channel is shared by every agent in the process. Each action
//! holds the channel lock for its whole event sequence, so events from two
//! concurrent plans never interleave.

use super::Executor;
use async_trait::async_trait;
use deskpilot_common::{Action, ActionKind, ExecutionError};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    fn parse(name: Option<&str>) -> Result<Self, ExecutionError> {
        match name.unwrap_or("left") {
            "left" => Ok(MouseButton::Left),
            "right" => Ok(MouseButton::Right),
            "middle" => Ok(MouseButton::Middle),
            other => Err(ExecutionError::Unsupported(format!("mouse button '{}'", other))),
        }
    }

    /// X11 button number.
    fn code(&self) -> u8 {
        match self {
            MouseButton::Left => 1,
            MouseButton::Middle => 2,
            MouseButton::Right => 3,
        }
    }
}

const MODIFIERS: [&str; 7] = ["ctrl", "control", "shift", "alt", "super", "meta", "cmd"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCombo {
    pub modifiers: Vec<String>,
    pub key: String,
}

impl KeyCombo {
    pub fn parse(combo: &str) -> Result<Self, ExecutionError> {
        let mut parts: Vec<String> = combo.split('+').map(|p| p.trim().to_string()).collect();
        let key = parts
            .pop()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ExecutionError::Unsupported(format!("key combo '{}'", combo)))?;

        let modifiers = parts
            .into_iter()
            .map(|m| {
                let lower = m.to_lowercase();
                if MODIFIERS.contains(&lower.as_str()) {
                    Ok(lower)
                } else {
                    Err(ExecutionError::Unsupported(format!("modifier '{}'", m)))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { modifiers, key })
    }

    pub fn to_xdotool(&self) -> String {
        let mut parts: Vec<&str> = self
            .modifiers
            .iter()
            .map(|m| match m.as_str() {
                "control" => "ctrl",
                "cmd" | "meta" => "super",
                other => other,
            })
            .collect();
        parts.push(&self.key);
        parts.join("+")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Move { x: i64, y: i64 },
    Click { button: MouseButton, count: u8 },
    Scroll { dx: i64, dy: i64 },
    Key(KeyCombo),
    Type(String),
}

#[async_trait]
pub trait InputDevice: Send {
    fn name(&self) -> &'static str;

    async fn send(&mut self, event: &InputEvent) -> Result<(), ExecutionError>;
}

pub type SharedInputDevice = Arc<Mutex<Box<dyn InputDevice>>>;

pub fn shared_device(device: impl InputDevice + 'static) -> SharedInputDevice {
    Arc::new(Mutex::new(Box::new(device)))
}

pub struct InputExecutor {
    device: SharedInputDevice,
}

impl InputExecutor {
    pub fn new(device: impl InputDevice + 'static) -> Self {
        Self::with_shared(shared_device(device))
    }

    pub fn with_shared(device: SharedInputDevice) -> Self {
        Self { device }
    }

    fn events_for(action: &Action) -> Result<Vec<InputEvent>, ExecutionError> {
        let coord = |name: &str| action.int(name).unwrap_or(0);
        let events = match action.kind() {
            ActionKind::MouseMove => vec![InputEvent::Move {
                x: coord("x"),
                y: coord("y"),
            }],
            ActionKind::MouseClick => {
                let mut events = Vec::with_capacity(2);
                if let (Some(x), Some(y)) = (action.int("x"), action.int("y")) {
                    events.push(InputEvent::Move { x, y });
                }
                events.push(InputEvent::Click {
                    button: MouseButton::parse(action.text("button"))?,
                    count: action.int("count").unwrap_or(1).clamp(1, 3) as u8,
                });
                events
            }
            ActionKind::Scroll => vec![InputEvent::Scroll {
                dx: coord("dx"),
                dy: coord("dy"),
            }],
            ActionKind::KeyPress => vec![InputEvent::Key(KeyCombo::parse(
                action.text("key").unwrap_or_default(),
            )?)],
            ActionKind::TypeText => vec![InputEvent::Type(
                action.text("text").unwrap_or_default().to_string(),
            )],
            other => {
                return Err(ExecutionError::Unsupported(format!(
                    "{} is not an input action",
                    other
                )));
            }
        };
        Ok(events)
    }
}

#[async_trait]
impl Executor for InputExecutor {
    fn name(&self) -> &'static str {
        "input"
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
        let events = Self::events_for(action)?;

        let mut device = self.device.lock().await;
        for event in &events {
            device.send(event).await?;
        }
        tracing::debug!(device = device.name(), events = events.len(), "input sent");

        Ok(Some(json!({ "device": device.name(), "events": events.len() })))
    }
}

/// Drives the X11 session through the `xdotool` helper.
#[derive(Debug, Default)]
pub struct XdotoolDevice;

impl XdotoolDevice {
    fn args_for(event: &InputEvent) -> Vec<String> {
        match event {
            InputEvent::Move { x, y } => vec!["mousemove".into(), x.to_string(), y.to_string()],
            InputEvent::Click { button, count } => vec![
                "click".into(),
                "--repeat".into(),
                count.to_string(),
                button.code().to_string(),
            ],
            InputEvent::Scroll { dx, dy } => {
                // Wheel buttons: 4 up, 5 down, 6 left, 7 right.
                let mut args = Vec::new();
                for (delta, neg, pos) in [(*dy, 4, 5), (*dx, 6, 7)] {
                    if delta != 0 {
                        let button = if delta < 0 { neg } else { pos };
                        args.extend([
                            "click".to_string(),
                            "--repeat".to_string(),
                            delta.unsigned_abs().to_string(),
                            button.to_string(),
                        ]);
                    }
                }
                args
            }
            InputEvent::Key(combo) => vec!["key".into(), combo.to_xdotool()],
            InputEvent::Type(text) => vec!["type".into(), "--".into(), text.clone()],
        }
    }
}

#[async_trait]
impl InputDevice for XdotoolDevice {
    fn name(&self) -> &'static str {
        "xdotool"
    }

    async fn send(&mut self, event: &InputEvent) -> Result<(), ExecutionError> {
        let output = tokio::process::Command::new("xdotool")
            .args(Self::args_for(event))
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ExecutionError::Unsupported("xdotool is not installed".into())
                }
                _ => ExecutionError::Io(format!("xdotool: {}", e)),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ExecutionError::Io(format!(
                "xdotool exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Records events instead of emitting them. Used for `--dry-run` and tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingDevice {
    events: Arc<StdMutex<Vec<InputEvent>>>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<InputEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl InputDevice for RecordingDevice {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&mut self, event: &InputEvent) -> Result<(), ExecutionError> {
        tracing::info!(?event, "dry-run input");
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        // Give other tasks a chance to run between events, as a real device would.
        tokio::task::yield_now().await;
        Ok(())
    }
}
