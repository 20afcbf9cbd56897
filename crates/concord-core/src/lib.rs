//! Concord Core Library
//!
//! Evidence-backed multi-agent orchestration: a single gated session, a DAG
//! of agents run with bounded concurrency, claim validation against an
//! evidence pool, cross-agent reconciliation, bounded recovery and an
//! advisory-only learning observer.

pub mod config;
pub mod coordinator;
pub mod correlator;
pub mod domain;
pub mod event_log;
pub mod evidence;
pub mod learning;
pub mod metrics;
pub mod obs;
pub mod pipeline;
pub mod reconcile;
pub mod recovery;
pub mod session;
pub mod status;
pub mod telemetry;

pub use config::ConcordConfig;

pub use coordinator::{
    AgentCoordinator, AgentFailure, AgentGraph, AgentInput, AgentProducer, CoordinatorConfig,
    CoordinatorRun, FnProducer, ProducerMap, ProducerOutput, RunScope,
};

pub use correlator::{ToolCall, ToolCallCorrelator, ToolCallRecord, ToolCallStatus};

pub use domain::{
    AgentDescriptor, AgentId, AgentOutput, AgentStatus, BlockReason, Claim, ClaimRecord,
    ConcordError, Context, EventKind, Evidence, EvidenceId, EvidencePool, FatalReport,
    ReinvestigationRequest, Result, RunReport, SourceKind, ValidationEvent,
};

pub use event_log::EventLog;

pub use evidence::{EvidenceThresholds, EvidenceValidator, EvidenceVerdict};

pub use learning::{
    AdviceContext, Insight, LearningConfig, LearningCore, LearningIntensity, LearningObserver,
    LearningStatus, NoopLearning,
};

pub use pipeline::Orchestrator;

pub use reconcile::{
    AttributedClaim, Conflict, ConflictKind, CrossAgentValidator, ReconcileConfig,
    ReconciliationResult, Resolution, ResolutionStrategy,
};

pub use recovery::{
    read_recovery_artifact, write_recovery_artifact, FailureCondition, FailureSignal,
    RecoveryAction, RecoveryAttemptResult, RecoveryDecision, RecoveryHandler, RecoveryLog,
    RecoveryManager, RecoveryOutcome, RecoveryPolicy,
};

pub use session::{Phase, Session, SessionManager, SessionState};
pub use status::HealthStatus;

pub use metrics::METRICS;
pub use telemetry::init_tracing;

/// Concord version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
