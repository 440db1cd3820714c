//! Per-kind parameter schemas.
//!
//! Validation happens once, when an [`crate::action::Action`] is built.
//! Executors can therefore read required parameters without re-checking them.

use crate::action::{ActionKind, ParamValue, Parameters};
use crate::risk::RiskLevel;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Bool,
    /// Any string, including empty.
    Text,
    /// Non-blank string.
    Name,
    /// Absolute filesystem path.
    AbsPath,
    /// Glob pattern accepted by the `glob` crate.
    Glob,
}

impl ParamType {
    fn expected(&self) -> &'static str {
        match self {
            ParamType::Int => "int",
            ParamType::Bool => "bool",
            ParamType::Text | ParamType::Name | ParamType::AbsPath | ParamType::Glob => "text",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub required: bool,
}

const fn req(name: &'static str, ty: ParamType) -> ParamSpec {
    ParamSpec {
        name,
        ty,
        required: true,
    }
}

const fn opt(name: &'static str, ty: ParamType) -> ParamSpec {
    ParamSpec {
        name,
        ty,
        required: false,
    }
}

const MOUSE_MOVE: &[ParamSpec] = &[req("x", ParamType::Int), req("y", ParamType::Int)];
const MOUSE_CLICK: &[ParamSpec] = &[
    opt("button", ParamType::Name),
    opt("x", ParamType::Int),
    opt("y", ParamType::Int),
    opt("count", ParamType::Int),
];
const SCROLL: &[ParamSpec] = &[req("dy", ParamType::Int), opt("dx", ParamType::Int)];
const KEY_PRESS: &[ParamSpec] = &[req("key", ParamType::Name)];
const TYPE_TEXT: &[ParamSpec] = &[req("text", ParamType::Name), opt("secret", ParamType::Bool)];
const OPEN_APP: &[ParamSpec] = &[req("name", ParamType::Name), opt("args", ParamType::Text)];
const CLOSE_APP: &[ParamSpec] = &[req("name", ParamType::Name), opt("force", ParamType::Bool)];
const SWITCH_APP: &[ParamSpec] = &[req("name", ParamType::Name)];
const CREATE_FILE: &[ParamSpec] = &[
    req("path", ParamType::AbsPath),
    opt("content", ParamType::Text),
];
const READ_FILE: &[ParamSpec] = &[req("path", ParamType::AbsPath)];
const WRITE_FILE: &[ParamSpec] = &[
    req("path", ParamType::AbsPath),
    req("content", ParamType::Text),
    opt("append", ParamType::Bool),
];
const DELETE_FILE: &[ParamSpec] = &[req("path", ParamType::AbsPath)];
const MOVE_FILE: &[ParamSpec] = &[
    req("from", ParamType::AbsPath),
    req("to", ParamType::AbsPath),
];
const LIST_DIRECTORY: &[ParamSpec] = &[
    req("path", ParamType::AbsPath),
    opt("pattern", ParamType::Glob),
];

pub const MOUSE_BUTTONS: [&str; 3] = ["left", "right", "middle"];
pub const MAX_CLICK_COUNT: i64 = 3;

pub fn spec_for(kind: ActionKind) -> &'static [ParamSpec] {
    match kind {
        ActionKind::MouseMove => MOUSE_MOVE,
        ActionKind::MouseClick => MOUSE_CLICK,
        ActionKind::Scroll => SCROLL,
        ActionKind::KeyPress => KEY_PRESS,
        ActionKind::TypeText => TYPE_TEXT,
        ActionKind::OpenApp => OPEN_APP,
        ActionKind::CloseApp => CLOSE_APP,
        ActionKind::SwitchApp => SWITCH_APP,
        ActionKind::CreateFile => CREATE_FILE,
        ActionKind::ReadFile => READ_FILE,
        ActionKind::WriteFile => WRITE_FILE,
        ActionKind::DeleteFile => DELETE_FILE,
        ActionKind::MoveFile => MOVE_FILE,
        ActionKind::ListDirectory => LIST_DIRECTORY,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("{kind}: missing required parameter '{name}'")]
    Missing { kind: ActionKind, name: String },
    #[error("{kind}: unknown parameter '{name}'")]
    Unknown { kind: ActionKind, name: String },
    #[error("{kind}: parameter '{name}' expected {expected}, got {got}")]
    WrongType {
        kind: ActionKind,
        name: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("{kind}: parameter '{name}' is invalid: {reason}")]
    Invalid {
        kind: ActionKind,
        name: String,
        reason: String,
    },
    #[error("{kind}: risk level {claimed} is below the minimum {floor} for these parameters")]
    RiskBelowFloor {
        kind: ActionKind,
        claimed: RiskLevel,
        floor: RiskLevel,
    },
}

fn invalid(kind: ActionKind, name: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::Invalid {
        kind,
        name: name.to_string(),
        reason: reason.into(),
    }
}

pub fn validate(kind: ActionKind, params: &Parameters) -> Result<(), SchemaError> {
    let spec = spec_for(kind);

    if let Some(name) = params.keys().find(|k| !spec.iter().any(|s| s.name == k.as_str())) {
        return Err(SchemaError::Unknown {
            kind,
            name: name.clone(),
        });
    }

    for param in spec {
        match params.get(param.name) {
            Some(value) => check_type(kind, param, value)?,
            None if param.required => {
                return Err(SchemaError::Missing {
                    kind,
                    name: param.name.to_string(),
                });
            }
            None => {}
        }
    }

    check_constraints(kind, params)
}

fn check_type(kind: ActionKind, spec: &ParamSpec, value: &ParamValue) -> Result<(), SchemaError> {
    let type_ok = match (spec.ty, value) {
        (ParamType::Int, ParamValue::Int(_)) => true,
        (ParamType::Bool, ParamValue::Bool(_)) => true,
        (
            ParamType::Text | ParamType::Name | ParamType::AbsPath | ParamType::Glob,
            ParamValue::Text(_),
        ) => true,
        _ => false,
    };
    if !type_ok {
        return Err(SchemaError::WrongType {
            kind,
            name: spec.name.to_string(),
            expected: spec.ty.expected(),
            got: value.type_name(),
        });
    }

    let Some(text) = value.as_str() else {
        return Ok(());
    };
    match spec.ty {
        ParamType::Name if text.trim().is_empty() => {
            Err(invalid(kind, spec.name, "must not be blank"))
        }
        ParamType::AbsPath if !Path::new(text).is_absolute() => {
            Err(invalid(kind, spec.name, "must be an absolute path"))
        }
        ParamType::Glob => glob::Pattern::new(text)
            .map(|_| ())
            .map_err(|e| invalid(kind, spec.name, e.to_string())),
        _ => Ok(()),
    }
}

fn check_constraints(kind: ActionKind, params: &Parameters) -> Result<(), SchemaError> {
    let int = |name: &str| params.get(name).and_then(ParamValue::as_int);

    match kind {
        ActionKind::MouseClick => {
            if let Some(button) = params.get("button").and_then(ParamValue::as_str)
                && !MOUSE_BUTTONS.contains(&button)
            {
                return Err(invalid(
                    kind,
                    "button",
                    format!("expected one of {:?}", MOUSE_BUTTONS),
                ));
            }
            if int("x").is_some() != int("y").is_some() {
                return Err(invalid(kind, "x", "x and y must be given together"));
            }
            if let Some(count) = int("count")
                && !(1..=MAX_CLICK_COUNT).contains(&count)
            {
                return Err(invalid(
                    kind,
                    "count",
                    format!("must be between 1 and {}", MAX_CLICK_COUNT),
                ));
            }
        }
        ActionKind::Scroll => {
            if int("dy").unwrap_or(0) == 0 && int("dx").unwrap_or(0) == 0 {
                return Err(invalid(kind, "dy", "scroll distance must be non-zero"));
            }
        }
        ActionKind::KeyPress => {
            let key = params.get("key").and_then(ParamValue::as_str).unwrap_or("");
            if key.split('+').any(|part| part.trim().is_empty()) {
                return Err(invalid(kind, "key", format!("malformed key combo '{}'", key)));
            }
        }
        _ => {}
    }
    Ok(())
}
