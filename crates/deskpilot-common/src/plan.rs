use crate::action::Action;
use crate::outcome::OutcomeStatus;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Ordered actions derived from one command.
///
/// Execution order is significant: later actions may depend on the
/// OS-visible side effects of earlier ones, so a plan is never run in
/// parallel.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    actions: Vec<Action>,
    source_text: String,
    confidence: f32,
    best_effort: bool,
}

impl Plan {
    pub fn new(source_text: impl Into<String>, actions: Vec<Action>, confidence: f32) -> Self {
        Self {
            actions,
            source_text: source_text.into(),
            confidence: if confidence.is_finite() {
                confidence.clamp(0.0, 1.0)
            } else {
                0.0
            },
            best_effort: false,
        }
    }

    /// Continue past failed actions instead of aborting the plan.
    pub fn with_best_effort(mut self, best_effort: bool) -> Self {
        self.best_effort = best_effort;
        self
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    /// Telemetry only. Never used to drop actions.
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn is_best_effort(&self) -> bool {
        self.best_effort
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub text: String,
    pub status: OutcomeStatus,
}

/// Prior turns handed to the interpreter for multi-step tasks.
/// Bounded; the oldest turn is evicted first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    turns: VecDeque<Turn>,
    #[serde(skip)]
    capacity: usize,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::with_capacity(8)
    }
}

impl ConversationContext {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, turn: Turn) {
        if self.capacity == 0 {
            return;
        }
        while self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
