//! Recovery Manager: bounded, policy-controlled recovery from run failures.
//!
//! This module provides:
//! - failure classification from [`ConcordError`]s and coordinator failures
//! - a bounded recovery loop whose every decision is logged as a `ValidationEvent`
//! - auditable recovery artifacts with digest verification

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::{AgentId, ConcordError, EventKind, Result, ValidationEvent};
use crate::event_log::EventLog;
use crate::metrics::METRICS;
use crate::obs;

/// Failure taxonomy the recovery planner acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCondition {
    SessionConflict,
    Blocked,
    UpstreamAgentFailed,
    AgentTimeout,
}

impl FailureCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCondition::SessionConflict => "session_conflict",
            FailureCondition::Blocked => "blocked",
            FailureCondition::UpstreamAgentFailed => "upstream_agent_failed",
            FailureCondition::AgentTimeout => "agent_timeout",
        }
    }
}

/// Structured failure signal handed to the recovery loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSignal {
    pub condition: FailureCondition,
    pub detail: String,
    /// Agents the failure is attributed to.
    pub agents: Vec<AgentId>,
}

impl FailureSignal {
    pub fn new(condition: FailureCondition, detail: impl Into<String>) -> Self {
        Self {
            condition,
            detail: detail.into(),
            agents: Vec::new(),
        }
    }

    pub fn with_agents(mut self, agents: impl IntoIterator<Item = AgentId>) -> Self {
        self.agents = agents.into_iter().collect();
        self
    }

    /// Map a domain error onto a recoverable condition, if it is one.
    pub fn from_error(error: &ConcordError) -> Option<Self> {
        let condition = match error {
            ConcordError::SessionConflict { .. } => FailureCondition::SessionConflict,
            ConcordError::Blocked { .. } => FailureCondition::Blocked,
            ConcordError::UpstreamAgentFailed { .. } => FailureCondition::UpstreamAgentFailed,
            _ => return None,
        };
        let signal = Self::new(condition, error.to_string());
        Some(match error {
            ConcordError::UpstreamAgentFailed { agent, upstream } => {
                signal.with_agents([agent.clone(), upstream.clone()])
            }
            _ => signal,
        })
    }
}

/// Recovery action selected per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Back off, then retry the failed operation.
    WaitAndRetry,
    /// Re-invoke the owning agents with unresolved claims as feedback.
    Reinvestigate,
    /// Re-invoke an agent that missed its deadline.
    ReinvokeAgent,
    Escalate,
}

impl RecoveryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryAction::WaitAndRetry => "wait_and_retry",
            RecoveryAction::Reinvestigate => "reinvestigate",
            RecoveryAction::ReinvokeAgent => "reinvoke_agent",
            RecoveryAction::Escalate => "escalate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Recovered,
    Failed,
}

/// Bounded recovery policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryPolicy {
    pub max_attempts: u32,
    /// Base back-off before retrying a conflicting session start; grows linearly.
    pub session_retry_delay_ms: u64,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            session_retry_delay_ms: 50,
        }
    }
}

/// One auditable decision in the recovery timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryDecision {
    pub attempt: u32,
    pub condition: FailureCondition,
    pub action: RecoveryAction,
    pub agents: Vec<AgentId>,
    pub rationale: String,
}

/// Result from applying one recovery action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAttemptResult {
    pub success: bool,
    pub next_failure: Option<FailureSignal>,
}

impl RecoveryAttemptResult {
    pub fn recovered() -> Self {
        Self {
            success: true,
            next_failure: None,
        }
    }

    pub fn still_failing(next: FailureSignal) -> Self {
        Self {
            success: false,
            next_failure: Some(next),
        }
    }
}

/// Full recovery log for artifacts and the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryLog {
    pub run_id: String,
    pub policy: RecoveryPolicy,
    pub initial_failure: FailureSignal,
    pub decisions: Vec<RecoveryDecision>,
    pub outcome: RecoveryOutcome,
    pub attempts_used: u32,
    pub final_failure: Option<FailureSignal>,
    pub evaluated_at: DateTime<Utc>,
}

impl RecoveryLog {
    pub fn recovered(&self) -> bool {
        self.outcome == RecoveryOutcome::Recovered
    }
}

/// Applies a chosen action. Implemented by whoever owns the failed run.
#[async_trait]
pub trait RecoveryHandler: Send {
    async fn apply(
        &mut self,
        decision: &RecoveryDecision,
        failure: &FailureSignal,
    ) -> RecoveryAttemptResult;
}

fn decide_action(signal: &FailureSignal) -> (RecoveryAction, String) {
    match signal.condition {
        FailureCondition::SessionConflict => (
            RecoveryAction::WaitAndRetry,
            "another session is active; back off and retry".to_string(),
        ),
        FailureCondition::Blocked => (
            RecoveryAction::Reinvestigate,
            "reconciliation blocked; re-invoke owning agents with feedback".to_string(),
        ),
        FailureCondition::AgentTimeout => (
            RecoveryAction::ReinvokeAgent,
            "agent missed its deadline; re-invoke it".to_string(),
        ),
        FailureCondition::UpstreamAgentFailed => (
            RecoveryAction::Escalate,
            "upstream agent failed; dependents cannot be recovered".to_string(),
        ),
    }
}

/// Drives the bounded recovery loop and records every attempt.
pub struct RecoveryManager {
    policy: RecoveryPolicy,
    log: Arc<EventLog>,
}

impl RecoveryManager {
    pub fn new(policy: RecoveryPolicy, log: Arc<EventLog>) -> Self {
        Self { policy, log }
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Choose the action for `attempt` without applying it.
    pub fn plan(&self, attempt: u32, signal: &FailureSignal) -> RecoveryDecision {
        let (action, rationale) = decide_action(signal);
        RecoveryDecision {
            attempt,
            condition: signal.condition,
            action,
            agents: signal.agents.clone(),
            rationale,
        }
    }

    /// Run the loop until `handler` reports success, the policy escalates,
    /// or `max_attempts` is exhausted.
    pub async fn execute(
        &self,
        session_id: Option<Uuid>,
        initial_failure: FailureSignal,
        handler: &mut dyn RecoveryHandler,
    ) -> RecoveryLog {
        let run_id = session_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "detached".to_string());
        let mut current = initial_failure.clone();
        let mut decisions = Vec::new();
        let mut attempts_used = 0u32;

        let finish = |decisions, outcome, attempts_used, final_failure| RecoveryLog {
            run_id: run_id.clone(),
            policy: self.policy.clone(),
            initial_failure: initial_failure.clone(),
            decisions,
            outcome,
            attempts_used,
            final_failure,
            evaluated_at: Utc::now(),
        };

        for attempt in 1..=self.policy.max_attempts.max(1) {
            attempts_used = attempt;
            let decision = self.plan(attempt, &current);
            METRICS.inc_recovery_attempts();
            obs::emit_recovery_decision(
                decision.attempt,
                decision.condition.as_str(),
                decision.action.as_str(),
            );
            self.record(session_id, &decision, "planned");
            decisions.push(decision.clone());

            if decision.action == RecoveryAction::Escalate {
                return finish(decisions, RecoveryOutcome::Failed, attempts_used, Some(current));
            }
            if decision.action == RecoveryAction::WaitAndRetry {
                let delay = self.policy.session_retry_delay_ms.saturating_mul(attempt as u64);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let result = handler.apply(&decision, &current).await;
            self.record(
                session_id,
                &decision,
                if result.success { "recovered" } else { "failed" },
            );
            if result.success {
                return finish(decisions, RecoveryOutcome::Recovered, attempts_used, None);
            }
            if let Some(next) = result.next_failure {
                current = next;
            }
        }

        finish(decisions, RecoveryOutcome::Failed, attempts_used, Some(current))
    }

    fn record(&self, session_id: Option<Uuid>, decision: &RecoveryDecision, outcome: &str) {
        self.log.record(
            ValidationEvent::new(EventKind::RecoveryAttempt, outcome)
                .with_session(session_id)
                .with_context(json!({
                    "attempt": decision.attempt,
                    "condition": decision.condition,
                    "action": decision.action,
                    "agents": decision.agents,
                })),
        );
    }
}

fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Persist `<dir>/<run_id>/recovery.json` and `<dir>/<run_id>/recovery.digest`.
pub fn write_recovery_artifact(log: &RecoveryLog, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(&log.run_id);
    std::fs::create_dir_all(&run_dir)?;

    let artifact_path = run_dir.join("recovery.json");
    let digest_path = run_dir.join("recovery.digest");
    let json = serde_json::to_vec_pretty(log)?;
    std::fs::write(&artifact_path, &json)?;
    std::fs::write(&digest_path, digest_bytes(&json).as_bytes())?;
    Ok(artifact_path)
}

/// Read and verify `<dir>/<run_id>/recovery.json` integrity.
pub fn read_recovery_artifact(run_id: &str, dir: &Path) -> Result<RecoveryLog> {
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join("recovery.json"))?;
    let expected = std::fs::read_to_string(run_dir.join("recovery.digest"))?;

    let actual = digest_bytes(&json);
    if expected.trim() != actual {
        return Err(ConcordError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}
