//! Append-only validation events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a validation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    PhaseEntered,
    SessionHalted,
    SessionResumed,
    SessionCompleted,
    SessionFailed,
    AgentPublished,
    AgentDegraded,
    ClaimValidated,
    ConflictResolved,
    ReconciliationCompleted,
    RecoveryAttempt,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session_started",
            EventKind::PhaseEntered => "phase_entered",
            EventKind::SessionHalted => "session_halted",
            EventKind::SessionResumed => "session_resumed",
            EventKind::SessionCompleted => "session_completed",
            EventKind::SessionFailed => "session_failed",
            EventKind::AgentPublished => "agent_published",
            EventKind::AgentDegraded => "agent_degraded",
            EventKind::ClaimValidated => "claim_validated",
            EventKind::ConflictResolved => "conflict_resolved",
            EventKind::ReconciliationCompleted => "reconciliation_completed",
            EventKind::RecoveryAttempt => "recovery_attempt",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validation decision or lifecycle transition.
///
/// `seq` is assigned by the event log on append; it is 0 until then.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationEvent {
    pub seq: u64,
    pub kind: EventKind,
    pub session_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    /// Snapshot of whatever context the decision was made in.
    pub context: serde_json::Value,
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
}

impl ValidationEvent {
    pub fn new(kind: EventKind, outcome: impl Into<String>) -> Self {
        Self {
            seq: 0,
            kind,
            session_id: None,
            correlation_id: None,
            context: serde_json::Value::Null,
            outcome: outcome.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_session(mut self, session_id: Option<Uuid>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Convenience accessor for string fields of the context snapshot.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(|v| v.as_str())
    }
}
