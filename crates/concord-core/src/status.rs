//! Read-only health snapshot for operators.

use serde::{Deserialize, Serialize};

use crate::correlator::ToolCallRecord;
use crate::domain::ValidationEvent;
use crate::learning::LearningStatus;
use crate::session::Session;

/// Current session, the tail of the event trail, and learning health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub session: Option<Session>,
    pub recent_events: Vec<ValidationEvent>,
    pub recent_tool_calls: Vec<ToolCallRecord>,
    pub learning: LearningStatus,
}

impl HealthStatus {
    /// `true` when learning is on but its breaker has tripped.
    pub fn learning_degraded(&self) -> bool {
        self.learning.enabled && self.learning.breaker_open
    }
}
