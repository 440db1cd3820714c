//! Natural-language command interpretation.
//!
//! An [`InferenceBackend`] produces an untyped [`PlanDraft`];
//! [`CommandInterpreter`] turns that draft into a schema-valid [`Plan`] or
//! rejects it. It never repairs a draft it does not understand.

pub mod http;
pub mod rules;

use async_trait::async_trait;
use deskpilot_common::{
    Action, ActionKind, ConversationContext, InterpretationError, ParamValue, Parameters, Plan,
    RiskClassifier,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub use http::HttpBackend;
pub use rules::RuleBackend;

/// One action as a backend describes it, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDraft {
    pub kind: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ActionDraft {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            parameters: Map::new(),
        }
    }

    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDraft {
    #[serde(default)]
    pub actions: Vec<ActionDraft>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub best_effort: bool,
}

fn default_confidence() -> f32 {
    1.0
}

impl PlanDraft {
    pub fn new(actions: Vec<ActionDraft>) -> Self {
        Self {
            actions,
            confidence: default_confidence(),
            best_effort: false,
        }
    }
}

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Translates `text` into a draft. `timeout` is the budget the caller
    /// will enforce; backends with their own transport timeouts should use it.
    async fn translate(
        &self,
        text: &str,
        context: &ConversationContext,
        timeout: Duration,
    ) -> Result<PlanDraft, InterpretationError>;
}

pub struct CommandInterpreter {
    backend: Arc<dyn InferenceBackend>,
    classifier: RiskClassifier,
    timeout: Duration,
}

impl CommandInterpreter {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        classifier: RiskClassifier,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            classifier,
            timeout,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn classifier(&self) -> &RiskClassifier {
        &self.classifier
    }

    /// One attempt. Retrying transient failures is the caller's job.
    pub async fn translate(
        &self,
        text: &str,
        context: &ConversationContext,
    ) -> Result<Plan, InterpretationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(InterpretationError::EmptyCommand);
        }

        let call = self.backend.translate(text, context, self.timeout);
        let draft = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result?,
            Err(_) => return Err(InterpretationError::timeout(self.timeout)),
        };

        self.build_plan(text, draft)
    }

    pub fn build_plan(&self, text: &str, draft: PlanDraft) -> Result<Plan, InterpretationError> {
        if draft.actions.is_empty() {
            return Err(InterpretationError::UnsupportedIntent(format!(
                "no action matches '{}'",
                text
            )));
        }

        let actions = draft
            .actions
            .into_iter()
            .map(|d| self.build_action(d))
            .collect::<Result<Vec<_>, _>>()?;

        let plan = Plan::new(text, actions, draft.confidence).with_best_effort(draft.best_effort);
        if plan.is_best_effort() {
            tracing::info!(actions = plan.len(), "plan marked best-effort");
        }
        Ok(plan)
    }

    fn build_action(&self, draft: ActionDraft) -> Result<Action, InterpretationError> {
        let kind: ActionKind = draft
            .kind
            .parse()
            .map_err(|_| InterpretationError::UnsupportedIntent(format!("unknown action '{}'", draft.kind)))?;

        let mut parameters = Parameters::new();
        for (name, value) in draft.parameters {
            let value = ParamValue::from_json(&value).ok_or_else(|| {
                InterpretationError::Ambiguous(format!(
                    "{}: parameter '{}' has no usable value ({})",
                    kind, name, value
                ))
            })?;
            parameters.insert(name, value);
        }

        Action::new(kind, parameters, &self.classifier)
            .map_err(|e| InterpretationError::Ambiguous(e.to_string()))
    }
}
