//! The capability validators hold instead of a concrete learning engine.
//!
//! Validators receive `&dyn LearningObserver`; the [`NoopLearning`]
//! implementation is what "learning disabled" means, so whether learning is on
//! is a matter of which value was injected, never a flag checked mid-decision.

use serde::{Deserialize, Serialize};

use crate::domain::{EvidenceId, ValidationEvent};

/// What an advisory lookup is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceKind {
    /// Ordering the evidence scan for a claim.
    EvidenceSearch,
    /// Ordering conflicting subjects during reconciliation.
    ConflictOrdering,
}

/// Input to [`LearningObserver::advise`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdviceContext {
    pub subject: String,
    pub kind: AdviceKind,
}

impl AdviceContext {
    pub fn evidence_search(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            kind: AdviceKind::EvidenceSearch,
        }
    }

    pub fn conflict_ordering(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            kind: AdviceKind::ConflictOrdering,
        }
    }
}

/// A non-authoritative hint derived from past events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub subject: String,
    /// Evidence that settled this subject most often in the past.
    pub preferred_evidence: Option<EvidenceId>,
    /// How many conflicts this subject has been involved in.
    pub contention: u32,
    pub confidence: f64,
}

/// Learning subsystem health, surfaced through the status query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningStatus {
    pub enabled: bool,
    pub advisory: bool,
    pub breaker_open: bool,
    pub consecutive_failures: u32,
    pub dropped_events: u64,
    pub processed_events: u64,
    pub failed_events: u64,
}

/// Observer capability. Implementations must not block and must not panic
/// into the caller.
pub trait LearningObserver: Send + Sync {
    /// Record an event. Fire-and-forget.
    fn observe(&self, event: &ValidationEvent);

    /// Optional hint for ordering a search. Never consulted for the decision itself.
    fn advise(&self, context: &AdviceContext) -> Option<Insight>;

    fn status(&self) -> LearningStatus;
}

/// Learning disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLearning;

impl LearningObserver for NoopLearning {
    fn observe(&self, _event: &ValidationEvent) {}

    fn advise(&self, _context: &AdviceContext) -> Option<Insight> {
        None
    }

    fn status(&self) -> LearningStatus {
        LearningStatus::default()
    }
}
