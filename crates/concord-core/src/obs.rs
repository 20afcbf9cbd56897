//! Structured observability hooks for Concord run lifecycle events.
//!
//! Every emitter logs one `tracing` event with a stable `event = "..."` key so
//! log pipelines can filter on it. Levels: lifecycle at `info!`, per-claim
//! detail at `debug!`, halts and degradations at `warn!`.
//!
//! Filter with `CONCORD_LOG` / `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::session::{Phase, SessionState};

/// Session-scoped span; attach with `Instrument::instrument` so it survives awaits.
pub fn run_span(session_id: Uuid) -> tracing::Span {
    tracing::info_span!("concord.run", session_id = %session_id)
}

pub fn emit_session_transition(session_id: Uuid, from: SessionState, to: SessionState) {
    info!(
        event = "session.transition",
        session_id = %session_id,
        from = %from,
        to = %to,
    );
}

pub fn emit_phase_entered(session_id: Uuid, phase: Phase) {
    info!(event = "session.phase_entered", session_id = %session_id, phase = %phase);
}

pub fn emit_session_halted(session_id: Uuid, reason: &str) {
    warn!(event = "session.halted", session_id = %session_id, reason = %reason);
}

pub fn emit_agent_finished(agent_id: &str, status: &str, claims: usize, duration_ms: u128) {
    info!(
        event = "agent.finished",
        agent_id = %agent_id,
        status = %status,
        claims = claims,
        duration_ms = duration_ms as u64,
    );
}

pub fn emit_agent_degraded(agent_id: &str, reason: &str) {
    warn!(event = "agent.degraded", agent_id = %agent_id, reason = %reason);
}

pub fn emit_claim_validated(agent_id: &str, subject: &str, verdict: &str, score: f64) {
    debug!(
        event = "claim.validated",
        agent_id = %agent_id,
        subject = %subject,
        verdict = %verdict,
        score = score,
    );
}

pub fn emit_reconciliation(resolved: bool, conflicts: usize, accepted_fraction: f64) {
    info!(
        event = "reconcile.completed",
        resolved = resolved,
        conflicts = conflicts,
        accepted_fraction = accepted_fraction,
    );
}

pub fn emit_recovery_decision(attempt: u32, condition: &str, action: &str) {
    warn!(
        event = "recovery.decision",
        attempt = attempt,
        condition = %condition,
        action = %action,
    );
}

pub fn emit_run_finished(session_id: Uuid, state: SessionState, duration_ms: u128) {
    info!(
        event = "run.finished",
        session_id = %session_id,
        state = %state,
        duration_ms = duration_ms as u64,
    );
}
