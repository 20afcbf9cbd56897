//! Agent vocabulary: `AgentId`, `AgentDescriptor`, `AgentOutput`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::claim::Claim;
use crate::domain::digest::compute_digest;
use crate::domain::error::{ConcordError, Result};
use crate::evidence::EvidenceVerdict;

/// Key/value context passed between agents. Ordered for stable digests.
pub type Context = BTreeMap<String, Value>;

/// Stable agent identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An agent and the agents whose published context it consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: AgentId,
    pub dependencies: BTreeSet<AgentId>,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(id),
            dependencies: BTreeSet::new(),
        }
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.insert(AgentId::new(dependency));
        self
    }
}

/// Publication status of an agent's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentStatus {
    Published,
    /// Producer errored or missed its deadline.
    Degraded { reason: String },
    /// A dependency failed, so this agent never ran.
    UpstreamFailed { upstream: AgentId },
    /// The session halted before the agent started, or while it was in flight.
    Cancelled,
}

impl AgentStatus {
    pub fn is_published(&self) -> bool {
        matches!(self, AgentStatus::Published)
    }
}

/// One emitted claim together with the Evidence Validator's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub emitted: Claim,
    pub verdict: EvidenceVerdict,
}

/// Request sent back upstream when a claim could not be grounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReinvestigationRequest {
    pub subject: String,
    pub claim: Claim,
    pub reason: String,
}

/// The immutable, content-addressed result of one agent run.
///
/// `claims` holds only what survived evidence validation (accepted claims and
/// corrected alternatives); every emitted claim is kept in `verdicts` so the
/// final report can show what was rejected and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub agent_id: AgentId,
    pub status: AgentStatus,
    pub claims: Vec<Claim>,
    pub verdicts: Vec<ClaimRecord>,
    pub reinvestigation: Vec<ReinvestigationRequest>,
    pub inherited_context: Context,
    pub produced_context: Context,
    /// 0 for the first run, incremented by every recovery re-invocation.
    pub attempt: u32,
    /// SHA-256 of the canonical JSON of every other field.
    pub digest: String,
}

impl AgentOutput {
    /// Seal an output by computing and embedding its digest.
    #[allow(clippy::too_many_arguments)]
    pub fn publish(
        agent_id: AgentId,
        status: AgentStatus,
        claims: Vec<Claim>,
        verdicts: Vec<ClaimRecord>,
        reinvestigation: Vec<ReinvestigationRequest>,
        inherited_context: Context,
        produced_context: Context,
        attempt: u32,
    ) -> Result<Self> {
        let mut output = Self {
            agent_id,
            status,
            claims,
            verdicts,
            reinvestigation,
            inherited_context,
            produced_context,
            attempt,
            digest: String::new(),
        };
        output.digest = output.compute_digest()?;
        Ok(output)
    }

    /// An output carrying no claims, preserving the context the agent was given.
    pub fn empty(
        agent_id: AgentId,
        status: AgentStatus,
        inherited_context: Context,
        attempt: u32,
    ) -> Result<Self> {
        Self::publish(
            agent_id,
            status,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            inherited_context,
            Context::new(),
            attempt,
        )
    }

    fn compute_digest(&self) -> Result<String> {
        let mut unsealed = self.clone();
        unsealed.digest.clear();
        compute_digest(&serde_json::to_value(&unsealed)?)
    }

    /// Re-derive the digest and fail with `DigestMismatch` if anything changed.
    pub fn verify(&self) -> Result<()> {
        let actual = self.compute_digest()?;
        if actual != self.digest {
            return Err(ConcordError::DigestMismatch {
                expected: self.digest.clone(),
                actual,
            });
        }
        Ok(())
    }

    pub fn needs_reinvestigation(&self) -> bool {
        !self.reinvestigation.is_empty()
    }

    pub fn accepted_count(&self) -> usize {
        self.verdicts
            .iter()
            .filter(|r| r.verdict.is_accepted())
            .count()
    }
}
