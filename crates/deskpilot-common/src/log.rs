//! Persisted action log records.
//!
//! Training tooling reads these long after they are written, so the schema
//! is additive-only: new fields must be optional (`#[serde(default)]`) and
//! existing fields are never removed or retyped.

use crate::action::Action;
use crate::outcome::ActionResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub source_text: String,
    pub action: Action,
    pub result: ActionResult,
    pub duration_ms: u64,
    #[serde(default)]
    pub command_id: Option<Uuid>,
    #[serde(default)]
    pub step: Option<usize>,
}

impl LogEntry {
    pub fn new(
        source_text: impl Into<String>,
        action: Action,
        result: ActionResult,
        duration: Duration,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            source_text: source_text.into(),
            action,
            result,
            duration_ms: duration.as_millis() as u64,
            command_id: None,
            step: None,
        }
    }

    pub fn for_step(mut self, command_id: Uuid, step: usize) -> Self {
        self.command_id = Some(command_id);
        self.step = Some(step);
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Half-open `[start, end)` interval; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| *at >= s) && self.end.is_none_or(|e| *at < e)
    }
}
