//! Domain models for Concord.
//!
//! Canonical definitions for the core entities:
//! - `Claim` / `Evidence` / `SourceKind`: what agents assert and what backs it
//! - `AgentDescriptor` / `AgentOutput`: the agent DAG and its sealed results
//! - `ValidationEvent`: the append-only decision trail
//! - `RunReport` / `FatalReport`: what a run hands back to its caller

pub mod agent;
pub mod claim;
pub mod digest;
pub mod error;
pub mod event;
pub mod report;

pub use agent::{
    AgentDescriptor, AgentId, AgentOutput, AgentStatus, ClaimRecord, Context,
    ReinvestigationRequest,
};
pub use claim::{Claim, Evidence, EvidenceId, EvidencePool, SourceKind};
pub use error::{BlockReason, ConcordError, Result};
pub use event::{EventKind, ValidationEvent};
pub use report::{FatalReport, RunReport};
