//! Conflict and resolution types surfaced by cross-agent reconciliation.

use serde::{Deserialize, Serialize};

use crate::domain::{AgentId, Claim, SourceKind};
use crate::evidence::EvidenceVerdict;

/// A claim together with the agent that emitted it, its evidence verdict and
/// the authority of its best agreeing evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributedClaim {
    pub agent: AgentId,
    pub claim: Claim,
    pub verdict: EvidenceVerdict,
    /// `None` ranks below every source kind.
    pub authority: Option<SourceKind>,
}

impl AttributedClaim {
    /// The claim as it belongs in the canonical view: the emitted claim when
    /// accepted, the correction when one exists, nothing when ungrounded.
    pub fn canonical(&self) -> Option<Claim> {
        self.verdict.published_claim(&self.claim)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides are grounded in the same schema but assert different values.
    DirectContradiction,
    /// One side's value does not fit the shape primary evidence implies.
    SchemaMismatch,
    /// One side cites no evidence at all.
    MissingSupport,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConflictKind::DirectContradiction => "direct_contradiction",
            ConflictKind::SchemaMismatch => "schema_mismatch",
            ConflictKind::MissingSupport => "missing_support",
        };
        f.write_str(s)
    }
}

/// Two agents disagreeing on one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub subject: String,
    pub claim_a: AttributedClaim,
    pub claim_b: AttributedClaim,
    pub kind: ConflictKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The side with the higher-ranked supporting evidence wins.
    AuthorityOrder,
    /// Both sides tie, but a third claim on the subject outranks them.
    Superseded,
    /// Tie with nothing to break it. The session must halt.
    Halt,
}

impl ResolutionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionStrategy::AuthorityOrder => "authority_order",
            ResolutionStrategy::Superseded => "superseded",
            ResolutionStrategy::Halt => "halt",
        }
    }
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one conflict was settled. `chosen` is `None` exactly when the strategy is `Halt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub conflict: Conflict,
    pub chosen: Option<AttributedClaim>,
    pub strategy: ResolutionStrategy,
    pub rationale: String,
}

impl Resolution {
    pub fn is_halt(&self) -> bool {
        self.strategy == ResolutionStrategy::Halt
    }
}

pub(crate) fn authority_label(authority: Option<SourceKind>) -> String {
    authority
        .map(|k| k.to_string())
        .unwrap_or_else(|| "unsupported".to_string())
}
