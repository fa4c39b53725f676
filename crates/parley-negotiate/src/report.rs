//! Execution reports.
//!
//! A report is produced for every session, whatever its outcome, so the
//! hosting layer can see which entities were committed.

use chrono::{DateTime, Utc};
use parley_core::Anchor;
use parley_state::{CommitReport, EntityCommit};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::intent::ActionCategory;

/// The record of one intent execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Unique identifier for this report.
    pub id: Uuid,

    pub session_id: Uuid,

    /// Name of the intent.
    pub intent: String,

    /// The selected action, once one was selected.
    pub action: Option<String>,

    pub category: Option<ActionCategory>,

    /// The anchor as it stood when the session ended.
    pub anchor: Anchor,

    /// `None` until the session is terminal.
    pub outcome: Option<Outcome>,

    /// Per-entity commit results, in merge order.
    pub commits: Vec<EntityCommit>,

    pub trace: Vec<ExecutionEvent>,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionReport {
    pub fn new(session_id: Uuid, intent: impl Into<String>, anchor: Anchor) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            intent: intent.into(),
            action: None,
            category: None,
            anchor,
            outcome: None,
            commits: Vec::new(),
            trace: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Append an event to the trace.
    pub fn record(&mut self, event_type: ExecutionEventType, data: serde_json::Value) {
        self.trace.push(ExecutionEvent {
            id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            data,
        });
    }

    pub(crate) fn absorb(&mut self, commit: CommitReport) {
        self.commits = commit.entities;
    }

    pub(crate) fn finish(&mut self, outcome: Outcome) {
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
    }

    pub fn events(&self, event_type: &ExecutionEventType) -> impl Iterator<Item = &ExecutionEvent> {
        let event_type = event_type.clone();
        self.trace.iter().filter(move |e| e.event_type == event_type)
    }

    /// Duration of the session in milliseconds, once finished.
    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at.map(|end| {
            u64::try_from((end - self.started_at).num_milliseconds()).unwrap_or_default()
        })
    }
}

/// An event that occurred during a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub id: Uuid,
    pub event_type: ExecutionEventType,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// Types of execution events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionEventType {
    StateChanged,
    SymbolsBound,
    ReminderFired,
    ActionSelected,
    TransformCompleted,
    TransformFailed,
    ValidationFailed,
    MergeFailed,
    EntityCommitted,
    EntityFailed,
    Abandoned,
}

/// Outcome of an intent execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed { reason: String },
    Abandoned { reason: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}
