use deskpilot_common::{ActionKind, RiskClassifier, RiskLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeskpilotConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub input: InputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
    /// Extra attempts for timed-out low/medium risk actions.
    #[serde(default)]
    pub dispatch_retries: u32,
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            action_timeout_ms: default_action_timeout_ms(),
            dispatch_retries: 0,
            context_turns: default_context_turns(),
        }
    }
}

impl AgentConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }
}

fn default_action_timeout_ms() -> u64 {
    30000
}

fn default_context_turns() -> usize {
    8
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpreterBackendKind {
    #[default]
    Rules,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    #[serde(default)]
    pub backend: InterpreterBackendKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_interpret_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            backend: InterpreterBackendKind::default(),
            endpoint: None,
            timeout_ms: default_interpret_timeout_ms(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl InterpreterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retry number `attempt` (1-based): doubles each time,
    /// capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

fn default_interpret_timeout_ms() -> u64 {
    10000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    4000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default)]
    pub sandbox_roots: Vec<PathBuf>,
    #[serde(default)]
    pub protected_apps: Vec<String>,
    #[serde(default)]
    pub risk_overrides: HashMap<ActionKind, RiskLevel>,
    /// When non-empty, only these kinds may run.
    #[serde(default)]
    pub allow_kinds: Vec<ActionKind>,
    #[serde(default)]
    pub deny_kinds: Vec<ActionKind>,
    #[serde(default = "default_confirm_at")]
    pub confirm_at: RiskLevel,
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            sandbox_roots: Vec::new(),
            protected_apps: Vec::new(),
            risk_overrides: HashMap::new(),
            allow_kinds: Vec::new(),
            deny_kinds: Vec::new(),
            confirm_at: default_confirm_at(),
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
        }
    }
}

impl VerificationConfig {
    pub fn classifier(&self) -> RiskClassifier {
        RiskClassifier::new(self.sandbox_roots.iter().cloned(), &self.protected_apps)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }
}

fn default_confirm_at() -> RiskLevel {
    RiskLevel::High
}

fn default_confirmation_timeout_ms() -> u64 {
    60000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
    #[serde(default = "default_redact_in_logs")]
    pub redact_in_logs: bool,
    #[serde(default = "default_sensitive_fields")]
    pub sensitive_fields: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            redact_in_logs: default_redact_in_logs(),
            sensitive_fields: default_sensitive_fields(),
        }
    }
}

fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".deskpilot")
        .join("actions.jsonl")
}

fn default_redact_in_logs() -> bool {
    true
}

fn default_sensitive_fields() -> Vec<String> {
    vec![
        "password".to_string(),
        "token".to_string(),
        "secret".to_string(),
    ]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputDeviceKind {
    #[default]
    Xdotool,
    Recording,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default)]
    pub device: InputDeviceKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = InterpreterConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
            ..Default::default()
        };
        assert_eq!(cfg.backoff(1), Duration::from_millis(100));
        assert_eq!(cfg.backoff(2), Duration::from_millis(200));
        assert_eq!(cfg.backoff(3), Duration::from_millis(350));
        assert_eq!(cfg.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = r#"
verification:
  sandbox_roots: ["/tmp/sandbox"]
  risk_overrides:
    close_app: low
interpreter:
  max_attempts: 5
"#;
        let cfg: DeskpilotConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.interpreter.max_attempts, 5);
        assert_eq!(cfg.interpreter.initial_backoff_ms, 250);
        assert_eq!(cfg.verification.confirm_at, RiskLevel::High);
        assert_eq!(
            cfg.verification.risk_overrides.get(&ActionKind::CloseApp),
            Some(&RiskLevel::Low)
        );
        assert_eq!(cfg.agent.context_turns, 8);
    }
}
