use crate::risk::{RiskClassifier, RiskLevel};
use crate::schema::{self, ParamType, SchemaError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Closed vocabulary of operations the agent can perform.
///
/// Adding a kind means adding a variant here, a schema entry in
/// [`crate::schema::spec_for`] and an executor that declares support for it;
/// runtime init refuses to start while any kind is left without an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    MouseMove,
    MouseClick,
    Scroll,
    KeyPress,
    TypeText,
    OpenApp,
    CloseApp,
    SwitchApp,
    CreateFile,
    ReadFile,
    WriteFile,
    DeleteFile,
    MoveFile,
    ListDirectory,
}

/// Narrow OS capability an executor encapsulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorCategory {
    Input,
    Application,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown action kind: {0}")]
pub struct UnknownKind(pub String);

impl ActionKind {
    pub const ALL: [ActionKind; 14] = [
        ActionKind::MouseMove,
        ActionKind::MouseClick,
        ActionKind::Scroll,
        ActionKind::KeyPress,
        ActionKind::TypeText,
        ActionKind::OpenApp,
        ActionKind::CloseApp,
        ActionKind::SwitchApp,
        ActionKind::CreateFile,
        ActionKind::ReadFile,
        ActionKind::WriteFile,
        ActionKind::DeleteFile,
        ActionKind::MoveFile,
        ActionKind::ListDirectory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::MouseMove => "mouse_move",
            ActionKind::MouseClick => "mouse_click",
            ActionKind::Scroll => "scroll",
            ActionKind::KeyPress => "key_press",
            ActionKind::TypeText => "type_text",
            ActionKind::OpenApp => "open_app",
            ActionKind::CloseApp => "close_app",
            ActionKind::SwitchApp => "switch_app",
            ActionKind::CreateFile => "create_file",
            ActionKind::ReadFile => "read_file",
            ActionKind::WriteFile => "write_file",
            ActionKind::DeleteFile => "delete_file",
            ActionKind::MoveFile => "move_file",
            ActionKind::ListDirectory => "list_directory",
        }
    }

    pub fn category(&self) -> ExecutorCategory {
        match self {
            ActionKind::MouseMove
            | ActionKind::MouseClick
            | ActionKind::Scroll
            | ActionKind::KeyPress
            | ActionKind::TypeText => ExecutorCategory::Input,
            ActionKind::OpenApp | ActionKind::CloseApp | ActionKind::SwitchApp => {
                ExecutorCategory::Application
            }
            ActionKind::CreateFile
            | ActionKind::ReadFile
            | ActionKind::WriteFile
            | ActionKind::DeleteFile
            | ActionKind::MoveFile
            | ActionKind::ListDirectory => ExecutorCategory::File,
        }
    }

    /// File actions that change filesystem state.
    pub fn mutates_files(&self) -> bool {
        matches!(
            self,
            ActionKind::CreateFile
                | ActionKind::WriteFile
                | ActionKind::DeleteFile
                | ActionKind::MoveFile
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        ActionKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == needle)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl ParamValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Text(_) => "text",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Converts a loosely-typed JSON value coming off the wire.
    /// Floats, arrays, objects and null have no parameter representation.
    pub fn from_json(value: &Value) -> Option<ParamValue> {
        match value {
            Value::Bool(b) => Some(ParamValue::Bool(*b)),
            Value::Number(n) => n.as_i64().map(ParamValue::Int),
            Value::String(s) => Some(ParamValue::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(n) => write!(f, "{}", n),
            ParamValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

pub type Parameters = BTreeMap<String, ParamValue>;

/// Builds a parameter map from literal pairs.
pub fn param_map<const N: usize>(pairs: [(&str, ParamValue); N]) -> Parameters {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// One schema-valid operation with its risk level fixed at construction.
///
/// There is no way to mutate an `Action` after [`Action::new`] returns, and
/// deserialisation re-runs schema validation, so a value of this type is
/// always valid for its kind. A deserialised risk level is kept as recorded
/// unless it is lower than any configuration could have assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAction")]
pub struct Action {
    kind: ActionKind,
    parameters: Parameters,
    risk_level: RiskLevel,
}

#[derive(Deserialize)]
struct RawAction {
    kind: ActionKind,
    #[serde(default)]
    parameters: Parameters,
    risk_level: RiskLevel,
}

impl TryFrom<RawAction> for Action {
    type Error = SchemaError;

    fn try_from(raw: RawAction) -> Result<Self, Self::Error> {
        schema::validate(raw.kind, &raw.parameters)?;
        let floor = RiskClassifier::floor(raw.kind, &raw.parameters);
        if raw.risk_level < floor {
            return Err(SchemaError::RiskBelowFloor {
                kind: raw.kind,
                claimed: raw.risk_level,
                floor,
            });
        }
        Ok(Action {
            kind: raw.kind,
            parameters: raw.parameters,
            risk_level: raw.risk_level,
        })
    }
}

impl Action {
    pub fn new(
        kind: ActionKind,
        parameters: Parameters,
        classifier: &RiskClassifier,
    ) -> Result<Self, SchemaError> {
        schema::validate(kind, &parameters)?;
        let risk_level = classifier.classify(kind, &parameters);
        Ok(Self {
            kind,
            parameters,
            risk_level,
        })
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.parameters.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.param(name).and_then(ParamValue::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.param(name).and_then(ParamValue::as_int)
    }

    /// Optional boolean parameters default to `false`.
    pub fn flag(&self, name: &str) -> bool {
        self.param(name).and_then(ParamValue::as_bool).unwrap_or(false)
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        self.text(name).map(Path::new)
    }

    /// Copy with free-text parameters selected by `mask` replaced by `***`.
    /// Path and glob parameters are left alone so the copy stays valid.
    pub fn redacted(&self, mask: impl Fn(&str) -> bool) -> Action {
        let maskable = |name: &str| {
            schema::spec_for(self.kind)
                .iter()
                .any(|s| s.name == name && matches!(s.ty, ParamType::Text | ParamType::Name))
        };
        let parameters = self
            .parameters
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    ParamValue::Text(_) if mask(name) && maskable(name) => {
                        ParamValue::Text(REDACTED.to_string())
                    }
                    other => other.clone(),
                };
                (name.clone(), value)
            })
            .collect();
        Action {
            kind: self.kind,
            parameters,
            risk_level: self.risk_level,
        }
    }
}

pub const REDACTED: &str = "***";

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for (name, value) in &self.parameters {
            write!(f, " {}={}", name, value)?;
        }
        write!(f, " [{}]", self.risk_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn classifier() -> RiskClassifier {
        RiskClassifier::new(vec![PathBuf::from("/tmp/sandbox")], Vec::<String>::new())
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
        assert!("format_disk".parse::<ActionKind>().is_err());
    }

    #[test]
    fn new_rejects_invalid_parameters() {
        let err = Action::new(ActionKind::DeleteFile, Parameters::new(), &classifier());
        assert!(matches!(err, Err(SchemaError::Missing { .. })));
    }

    #[test]
    fn deserialize_revalidates_schema() {
        let good = r#"{"kind":"read_file","parameters":{"path":"/tmp/sandbox/a.txt"},"risk_level":"low"}"#;
        let action: Action = serde_json::from_str(good).unwrap();
        assert_eq!(action.kind(), ActionKind::ReadFile);

        let bad = r#"{"kind":"read_file","parameters":{"path":"relative.txt"},"risk_level":"low"}"#;
        assert!(serde_json::from_str::<Action>(bad).is_err());
    }

    #[test]
    fn deserialize_rejects_lowered_risk() {
        let lowered = r#"{"kind":"delete_file","parameters":{"path":"/etc/passwd"},"risk_level":"low"}"#;
        let err = serde_json::from_str::<Action>(lowered).unwrap_err();
        assert!(err.to_string().contains("below the minimum"));

        let sandboxed = r#"{"kind":"delete_file","parameters":{"path":"/tmp/sandbox/a"},"risk_level":"medium"}"#;
        let action: Action = serde_json::from_str(sandboxed).unwrap();
        assert_eq!(action.risk_level(), RiskLevel::Medium);
    }

    #[test]
    fn redaction_masks_text_but_not_paths() {
        let typed = Action::new(
            ActionKind::TypeText,
            param_map([("text", "hunter2".into()), ("secret", true.into())]),
            &classifier(),
        )
        .unwrap();
        let masked = typed.redacted(|name| name == "text");
        assert_eq!(masked.text("text"), Some(REDACTED));
        assert_eq!(masked.risk_level(), typed.risk_level());

        let write = Action::new(
            ActionKind::WriteFile,
            param_map([("path", "/tmp/sandbox/a".into()), ("content", "x".into())]),
            &classifier(),
        )
        .unwrap();
        let masked = write.redacted(|_| true);
        assert_eq!(masked.text("path"), Some("/tmp/sandbox/a"));
        assert_eq!(masked.text("content"), Some(REDACTED));
    }

    #[test]
    fn display_lists_parameters_and_risk() {
        let action = Action::new(
            ActionKind::DeleteFile,
            param_map([("path", "/tmp/sandbox/report.txt".into())]),
            &classifier(),
        )
        .unwrap();
        assert_eq!(
            action.to_string(),
            "delete_file path=\"/tmp/sandbox/report.txt\" [medium]"
        );
    }
}
