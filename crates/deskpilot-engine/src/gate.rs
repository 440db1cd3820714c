//! Verification gate: decides per action whether it may run unattended.
//!
//! `check` is a pure function of the action and the policy built from
//! [`VerificationConfig`]. With the default policy a high-risk action is
//! never allowed without confirmation; only an explicit `risk_overrides`
//! entry can change that, and every such downgrade is reported.

use crate::config::VerificationConfig;
use deskpilot_common::{Action, ActionKind, RiskClassifier, RiskLevel};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(String),
    RequireConfirmation,
}

#[derive(Debug, Clone)]
pub struct VerificationGate {
    allow_kinds: HashSet<ActionKind>,
    deny_kinds: HashSet<ActionKind>,
    risk_overrides: HashMap<ActionKind, RiskLevel>,
    confirm_at: RiskLevel,
    confirmation_timeout: Duration,
}

impl Default for VerificationGate {
    fn default() -> Self {
        Self::new(&VerificationConfig::default())
    }
}

impl VerificationGate {
    pub fn new(config: &VerificationConfig) -> Self {
        for (kind, level) in &config.risk_overrides {
            let ceiling = RiskClassifier::ceiling(*kind);
            if *level < ceiling {
                tracing::warn!(
                    kind = %kind,
                    from = %ceiling,
                    to = %level,
                    "risk override downgrades action kind"
                );
            }
        }

        Self {
            allow_kinds: config.allow_kinds.iter().copied().collect(),
            deny_kinds: config.deny_kinds.iter().copied().collect(),
            risk_overrides: config.risk_overrides.clone(),
            confirm_at: config.confirm_at,
            confirmation_timeout: config.confirmation_timeout(),
        }
    }

    pub fn confirmation_timeout(&self) -> Duration {
        self.confirmation_timeout
    }

    pub fn effective_risk(&self, action: &Action) -> RiskLevel {
        self.risk_overrides
            .get(&action.kind())
            .copied()
            .unwrap_or_else(|| action.risk_level())
    }

    pub fn check(&self, action: &Action) -> Verdict {
        let kind = action.kind();
        if self.deny_kinds.contains(&kind) {
            return Verdict::Deny(format!("{} is on the deny list", kind));
        }
        if !self.allow_kinds.is_empty() && !self.allow_kinds.contains(&kind) {
            return Verdict::Deny(format!("{} is not on the allow list", kind));
        }

        let risk = self.effective_risk(action);
        if risk >= self.confirm_at {
            return Verdict::RequireConfirmation;
        }

        if action.risk_level() >= self.confirm_at {
            tracing::warn!(
                kind = %action.kind(),
                effective = %risk,
                "risk override allows action without confirmation"
            );
        }
        Verdict::Allow
    }
}

/// How a confirmation request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Approved,
    Denied,
    TimedOut,
}

impl Confirmation {
    pub fn is_approved(&self) -> bool {
        *self == Confirmation::Approved
    }
}

/// Pending answer to a confirmation request.
///
/// The UI holds the matching [`ConfirmationResponder`]. Dropping the
/// responder without answering counts as a denial.
#[derive(Debug)]
pub struct PendingConfirmation {
    rx: oneshot::Receiver<bool>,
}

#[derive(Debug)]
pub struct ConfirmationResponder {
    tx: oneshot::Sender<bool>,
}

impl PendingConfirmation {
    pub fn channel() -> (ConfirmationResponder, PendingConfirmation) {
        let (tx, rx) = oneshot::channel();
        (ConfirmationResponder { tx }, PendingConfirmation { rx })
    }

    /// Already resolved with `answer`.
    pub fn resolved(answer: bool) -> Self {
        let (responder, pending) = Self::channel();
        responder.respond(answer);
        pending
    }

    pub fn denied() -> Self {
        Self::resolved(false)
    }

    pub async fn wait(self, timeout: Duration) -> Confirmation {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(true)) => Confirmation::Approved,
            Ok(Ok(false)) | Ok(Err(_)) => Confirmation::Denied,
            Err(_) => Confirmation::TimedOut,
        }
    }
}

impl ConfirmationResponder {
    pub fn respond(self, approved: bool) {
        // The agent may have stopped waiting already.
        let _ = self.tx.send(approved);
    }

    pub fn approve(self) {
        self.respond(true);
    }

    pub fn deny(self) {
        self.respond(false);
    }
}
