//! Domain-level error taxonomy for Concord.

use crate::domain::agent::AgentId;
use crate::domain::report::FatalReport;
use crate::session::{Phase, SessionState};

/// Why a reconciliation pass refused to produce a canonical view.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockReason {
    /// Two claims on `subject` tie in authority and nothing outranks them.
    AuthorityTie { subject: String },
    /// Too few claims survived evidence validation.
    QualityGate { accepted_fraction: f64, minimum: f64 },
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::AuthorityTie { subject } => {
                write!(f, "authority tie on subject '{subject}'")
            }
            BlockReason::QualityGate {
                accepted_fraction,
                minimum,
            } => write!(
                f,
                "accepted fraction {accepted_fraction:.2} below minimum {minimum:.2}"
            ),
        }
    }
}

/// Concord domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ConcordError {
    #[error("session conflict: session {session_id} is still active")]
    SessionConflict { session_id: uuid::Uuid },

    #[error("no active session")]
    NoActiveSession,

    #[error("phase order violation: cannot enter {phase}, missing {missing:?}")]
    PhaseOrderViolation { phase: Phase, missing: Vec<Phase> },

    #[error("invalid transition: cannot {action} while {state}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },

    #[error("dependency cycle among agents: {agents:?}")]
    DependencyCycle { agents: Vec<AgentId> },

    #[error("agent {agent} depends on unknown agent {dependency}")]
    UnknownDependency { agent: AgentId, dependency: AgentId },

    #[error("agent {0} declared more than once")]
    DuplicateAgent(AgentId),

    #[error("no producer registered for agent {0}")]
    MissingProducer(AgentId),

    #[error("agent {agent} cannot run: upstream agent {upstream} failed")]
    UpstreamAgentFailed { agent: AgentId, upstream: AgentId },

    #[error("insufficient evidence for subject '{subject}'")]
    InsufficientEvidence { subject: String },

    #[error("reconciliation blocked: {}", format_reasons(.reasons))]
    Blocked { reasons: Vec<BlockReason> },

    #[error("fatal: {}", .0.summary)]
    Fatal(Box<FatalReport>),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConcordError {
    /// Errors the Recovery Manager may act on rather than surfacing directly.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConcordError::SessionConflict { .. }
                | ConcordError::InsufficientEvidence { .. }
                | ConcordError::Blocked { .. }
        )
    }
}

fn format_reasons(reasons: &[BlockReason]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for Concord domain operations.
pub type Result<T> = std::result::Result<T, ConcordError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_violation_display() {
        let err = ConcordError::PhaseOrderViolation {
            phase: Phase::Synthesis,
            missing: vec![Phase::Discovery],
        };
        let msg = err.to_string();
        assert!(msg.contains("synthesis"));
        assert!(msg.contains("Discovery"));
    }

    #[test]
    fn test_blocked_lists_every_reason() {
        let err = ConcordError::Blocked {
            reasons: vec![
                BlockReason::AuthorityTie {
                    subject: "field-X".into(),
                },
                BlockReason::QualityGate {
                    accepted_fraction: 0.25,
                    minimum: 0.5,
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("field-X"));
        assert!(msg.contains("0.25"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(ConcordError::Blocked { reasons: vec![] }.is_recoverable());
        assert!(!ConcordError::DependencyCycle { agents: vec![] }.is_recoverable());
        assert!(!ConcordError::UpstreamAgentFailed {
            agent: AgentId::new("b"),
            upstream: AgentId::new("a"),
        }
        .is_recoverable());
    }
}
