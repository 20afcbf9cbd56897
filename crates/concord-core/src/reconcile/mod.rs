//! Cross-agent reconciliation.
//!
//! - [`conflict`]: `Conflict`, `Resolution`, `ResolutionStrategy`
//! - [`validator`]: `CrossAgentValidator::reconcile` and the quality gate

pub mod conflict;
pub mod validator;

pub use conflict::{AttributedClaim, Conflict, ConflictKind, Resolution, ResolutionStrategy};
pub use validator::{CrossAgentValidator, ReconcileConfig, ReconcileStatus, ReconciliationResult};
