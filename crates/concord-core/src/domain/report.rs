//! Terminal run reports.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::AgentOutput;
use crate::domain::error::BlockReason;
use crate::domain::event::ValidationEvent;
use crate::reconcile::{Conflict, ReconciliationResult};
use crate::recovery::RecoveryLog;

/// Everything a completed run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub session_id: Uuid,
    /// Final output per agent, in topological order.
    pub outputs: Vec<AgentOutput>,
    pub reconciliation: ReconciliationResult,
    pub recovery: Vec<RecoveryLog>,
    /// Full event trail of the session.
    pub events: Vec<ValidationEvent>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn output(&self, agent: &str) -> Option<&AgentOutput> {
        self.outputs.iter().find(|o| o.agent_id.as_str() == agent)
    }
}

/// Why a run ended in `Failed`, with enough context to audit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatalReport {
    pub summary: String,
    pub session_id: Option<Uuid>,
    /// Conflicts still unresolved when recovery gave up, ordered by subject.
    pub unresolved: Vec<Conflict>,
    pub block_reasons: Vec<BlockReason>,
    pub recovery: Vec<RecoveryLog>,
    pub events: Vec<ValidationEvent>,
}

impl FatalReport {
    pub fn new(summary: impl Into<String>, session_id: Option<Uuid>) -> Self {
        Self {
            summary: summary.into(),
            session_id,
            unresolved: Vec::new(),
            block_reasons: Vec::new(),
            recovery: Vec::new(),
            events: Vec::new(),
        }
    }
}
