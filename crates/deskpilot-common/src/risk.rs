use crate::action::{ActionKind, ParamValue, Parameters};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        })
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(format!("Unknown risk level: {}", other)),
        }
    }
}

/// Programs that execute whatever they are handed.
const COMMAND_RUNNERS: &[&str] = &[
    "sh", "bash", "zsh", "fish", "dash", "ksh", "csh", "tcsh", "cmd", "powershell", "pwsh",
    "python", "python3", "perl", "ruby", "node", "osascript", "env", "sudo", "doas", "su",
    "pkexec", "xargs", "nohup", "setsid", "rm", "dd", "mkfs", "shred",
];

/// Assigns a [`RiskLevel`] from an action's kind and parameters.
///
/// Classification is a pure function of its inputs and the configured
/// sandbox roots / protected application names; it never touches the
/// filesystem, so a path is "inside" a root only lexically.
#[derive(Debug, Clone, Default)]
pub struct RiskClassifier {
    sandbox_roots: Vec<PathBuf>,
    protected_apps: HashSet<String>,
    /// Treats every absolute path as sandboxed.
    sandbox_all: bool,
}

impl RiskClassifier {
    pub fn new<R, A>(sandbox_roots: R, protected_apps: A) -> Self
    where
        R: IntoIterator<Item = PathBuf>,
        A: IntoIterator,
        A::Item: AsRef<str>,
    {
        Self {
            sandbox_roots: sandbox_roots
                .into_iter()
                .filter(|r| r.is_absolute())
                .map(|r| normalize_path(&r))
                .collect(),
            protected_apps: protected_apps
                .into_iter()
                .map(|a| a.as_ref().trim().to_lowercase())
                .filter(|a| !a.is_empty())
                .collect(),
            sandbox_all: false,
        }
    }

    pub fn sandbox_roots(&self) -> &[PathBuf] {
        &self.sandbox_roots
    }

    pub fn is_sandboxed(&self, path: &Path) -> bool {
        if !path.is_absolute() {
            return false;
        }
        if self.sandbox_all {
            return true;
        }
        let path = normalize_path(path);
        self.sandbox_roots.iter().any(|root| path.starts_with(root))
    }

    pub fn is_protected_app(&self, name: &str) -> bool {
        self.protected_apps.contains(&name.trim().to_lowercase())
    }

    /// Whether launching `name` can run an arbitrary command.
    pub fn is_command_runner(&self, name: &str) -> bool {
        let name = name.trim();
        if name.contains('/') || name.contains('\\') {
            return true;
        }
        let lower = name.to_lowercase();
        let program = lower.strip_suffix(".exe").unwrap_or(&lower);
        COMMAND_RUNNERS.contains(&program) || self.is_protected_app(name)
    }

    /// Highest level `classify` can ever assign to `kind`.
    pub fn ceiling(kind: ActionKind) -> RiskLevel {
        match kind {
            ActionKind::MouseMove | ActionKind::Scroll | ActionKind::SwitchApp => RiskLevel::Low,
            ActionKind::MouseClick
            | ActionKind::KeyPress
            | ActionKind::TypeText
            | ActionKind::ReadFile
            | ActionKind::ListDirectory => RiskLevel::Medium,
            ActionKind::OpenApp
            | ActionKind::CloseApp
            | ActionKind::CreateFile
            | ActionKind::WriteFile
            | ActionKind::DeleteFile
            | ActionKind::MoveFile => RiskLevel::High,
        }
    }

    /// Lowest level `classify` assigns to these parameters under any
    /// configuration. Used to reject deserialised actions whose recorded
    /// risk was tampered down.
    pub fn floor(kind: ActionKind, params: &Parameters) -> RiskLevel {
        let permissive = RiskClassifier {
            sandbox_all: true,
            ..Default::default()
        };
        permissive.classify(kind, params)
    }

    pub fn classify(&self, kind: ActionKind, params: &Parameters) -> RiskLevel {
        let text = |name: &str| params.get(name).and_then(ParamValue::as_str);
        let sandboxed = |name: &str| text(name).is_some_and(|p| self.is_sandboxed(Path::new(p)));

        match kind {
            ActionKind::MouseMove | ActionKind::Scroll => RiskLevel::Low,
            ActionKind::MouseClick | ActionKind::KeyPress | ActionKind::TypeText => {
                RiskLevel::Medium
            }
            ActionKind::SwitchApp => RiskLevel::Low,
            ActionKind::OpenApp => {
                let with_args = text("args").is_some_and(|a| !a.trim().is_empty());
                let runner = text("name").is_some_and(|n| self.is_command_runner(n));
                if with_args || runner {
                    RiskLevel::High
                } else {
                    RiskLevel::Medium
                }
            }
            ActionKind::CloseApp => {
                let forced = params
                    .get("force")
                    .and_then(ParamValue::as_bool)
                    .unwrap_or(false);
                let protected = text("name").is_some_and(|n| self.is_protected_app(n));
                if forced || protected {
                    RiskLevel::High
                } else {
                    RiskLevel::Medium
                }
            }
            ActionKind::ReadFile | ActionKind::ListDirectory => {
                if sandboxed("path") {
                    RiskLevel::Low
                } else {
                    RiskLevel::Medium
                }
            }
            ActionKind::CreateFile | ActionKind::WriteFile | ActionKind::DeleteFile => {
                if sandboxed("path") {
                    RiskLevel::Medium
                } else {
                    RiskLevel::High
                }
            }
            ActionKind::MoveFile => {
                if sandboxed("from") && sandboxed("to") {
                    RiskLevel::Medium
                } else {
                    RiskLevel::High
                }
            }
        }
    }
}

/// Lexically resolves `.` and `..` without consulting the filesystem.
/// `..` never climbs above the root.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if out.parent().is_some() {
                    out.pop();
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}
