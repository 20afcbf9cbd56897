//! Session lifecycle and phase gating.
//!
//! A single [`SessionManager`] owns at most one live [`Session`]. All
//! mutations happen under one mutex so concurrent callers observe a total
//! order of transitions; every accepted transition is appended to the
//! [`EventLog`] before the lock is released.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use uuid::Uuid;

use crate::domain::{ConcordError, EventKind, Result, ValidationEvent};
use crate::event_log::EventLog;
use crate::obs;

/// Pipeline phases in their mandatory order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pre,
    Setup,
    Discovery,
    Synthesis,
    Reconciliation,
    Finalize,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Pre,
        Phase::Setup,
        Phase::Discovery,
        Phase::Synthesis,
        Phase::Reconciliation,
        Phase::Finalize,
    ];

    /// Every phase that must have been entered before this one.
    pub fn prerequisites(self) -> Vec<Phase> {
        Self::ALL.iter().copied().filter(|p| *p < self).collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Pre => "pre",
            Phase::Setup => "setup",
            Phase::Discovery => "discovery",
            Phase::Synthesis => "synthesis",
            Phase::Reconciliation => "reconciliation",
            Phase::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Halted,
    Completed,
    Failed,
}

impl SessionState {
    /// Completed and Failed are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Halted => "halted",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One orchestration run's lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub state: SessionState,
    pub active_phase: Option<Phase>,
    /// Phases entered so far, in order.
    pub completed_phases: Vec<Phase>,
    pub halt_reason: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Serializes session transitions and publishes the halt signal.
pub struct SessionManager {
    current: Mutex<Option<Session>>,
    log: Arc<EventLog>,
    halt_tx: watch::Sender<bool>,
}

impl SessionManager {
    pub fn new(log: Arc<EventLog>) -> Self {
        let (halt_tx, _) = watch::channel(false);
        Self {
            current: Mutex::new(None),
            log,
            halt_tx,
        }
    }

    /// Open a new session and move it to Running.
    ///
    /// Fails with `SessionConflict` while a previous session is Running or Halted.
    pub fn start(&self) -> Result<Uuid> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = current.as_ref() {
            if matches!(existing.state, SessionState::Running | SessionState::Halted) {
                return Err(ConcordError::SessionConflict {
                    session_id: existing.id,
                });
            }
        }

        let mut session = Session {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
            active_phase: None,
            completed_phases: Vec::new(),
            halt_reason: None,
            started_at: Utc::now(),
        };
        session.state = SessionState::Running;
        let id = session.id;
        *current = Some(session);
        self.halt_tx.send_replace(false);

        self.log.record(
            ValidationEvent::new(EventKind::SessionStarted, SessionState::Running.to_string())
                .with_session(Some(id)),
        );
        obs::emit_session_transition(id, SessionState::Idle, SessionState::Running);
        Ok(id)
    }

    /// Enter `phase` if every prerequisite has been entered and `phase` has not.
    pub fn enter_phase(&self, phase: Phase) -> Result<()> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let session = current.as_mut().ok_or(ConcordError::NoActiveSession)?;
        if session.state != SessionState::Running {
            return Err(ConcordError::InvalidTransition {
                state: session.state,
                action: "enter phase",
            });
        }

        let missing: Vec<Phase> = phase
            .prerequisites()
            .into_iter()
            .filter(|p| !session.completed_phases.contains(p))
            .collect();
        if !missing.is_empty() || session.completed_phases.contains(&phase) {
            return Err(ConcordError::PhaseOrderViolation { phase, missing });
        }

        session.completed_phases.push(phase);
        session.active_phase = Some(phase);
        self.log.record(
            ValidationEvent::new(EventKind::PhaseEntered, phase.to_string())
                .with_session(Some(session.id))
                .with_context(json!({ "phase": phase })),
        );
        obs::emit_phase_entered(session.id, phase);
        Ok(())
    }

    /// Halt the running session. Returns `false` if it was already halted,
    /// in which case nothing is recorded.
    pub fn halt(&self, reason: &str) -> Result<bool> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let session = current.as_mut().ok_or(ConcordError::NoActiveSession)?;
        match session.state {
            SessionState::Halted => return Ok(false),
            SessionState::Running => {}
            state => {
                return Err(ConcordError::InvalidTransition {
                    state,
                    action: "halt",
                })
            }
        }

        session.state = SessionState::Halted;
        session.halt_reason = Some(reason.to_string());
        self.halt_tx.send_replace(true);
        self.log.record(
            ValidationEvent::new(EventKind::SessionHalted, reason)
                .with_session(Some(session.id))
                .with_context(json!({ "phase": session.active_phase })),
        );
        obs::emit_session_halted(session.id, reason);
        Ok(true)
    }

    /// Back from Halted to Running. Only the recovery path calls this.
    pub fn resume(&self) -> Result<()> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let session = current.as_mut().ok_or(ConcordError::NoActiveSession)?;
        if session.state != SessionState::Halted {
            return Err(ConcordError::InvalidTransition {
                state: session.state,
                action: "resume",
            });
        }

        session.state = SessionState::Running;
        session.halt_reason = None;
        self.halt_tx.send_replace(false);
        self.log.record(
            ValidationEvent::new(EventKind::SessionResumed, SessionState::Running.to_string())
                .with_session(Some(session.id)),
        );
        obs::emit_session_transition(session.id, SessionState::Halted, SessionState::Running);
        Ok(())
    }

    /// Complete the session. Only legal while running in `Finalize`.
    pub fn finish(&self) -> Result<()> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let session = current.as_mut().ok_or(ConcordError::NoActiveSession)?;
        if session.state != SessionState::Running || session.active_phase != Some(Phase::Finalize)
        {
            return Err(ConcordError::InvalidTransition {
                state: session.state,
                action: "finish",
            });
        }

        session.state = SessionState::Completed;
        self.log.record(
            ValidationEvent::new(EventKind::SessionCompleted, SessionState::Completed.to_string())
                .with_session(Some(session.id)),
        );
        obs::emit_session_transition(session.id, SessionState::Running, SessionState::Completed);
        Ok(())
    }

    /// Move a Running or Halted session to Failed.
    pub fn fail(&self, reason: &str) -> Result<()> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let session = current.as_mut().ok_or(ConcordError::NoActiveSession)?;
        let from = session.state;
        if from.is_terminal() || from == SessionState::Idle {
            return Err(ConcordError::InvalidTransition {
                state: from,
                action: "fail",
            });
        }

        session.state = SessionState::Failed;
        self.halt_tx.send_replace(true);
        self.log.record(
            ValidationEvent::new(EventKind::SessionFailed, reason)
                .with_session(Some(session.id))
                .with_context(json!({ "phase": session.active_phase })),
        );
        obs::emit_session_transition(session.id, from, SessionState::Failed);
        Ok(())
    }

    pub fn snapshot(&self) -> Option<Session> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.snapshot().map(|s| s.id)
    }

    /// `true` is published whenever the session halts or fails.
    pub fn subscribe_halt(&self) -> watch::Receiver<bool> {
        self.halt_tx.subscribe()
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::NoopLearning;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(EventLog::new(Arc::new(NoopLearning))))
    }

    #[test]
    fn test_prerequisites_are_strict_prefix() {
        assert!(Phase::Pre.prerequisites().is_empty());
        assert_eq!(
            Phase::Synthesis.prerequisites(),
            vec![Phase::Pre, Phase::Setup, Phase::Discovery]
        );
    }

    #[test]
    fn test_phase_gating() {
        let sm = manager();
        sm.start().unwrap();
        let err = sm.enter_phase(Phase::Synthesis).unwrap_err();
        match err {
            ConcordError::PhaseOrderViolation { phase, missing } => {
                assert_eq!(phase, Phase::Synthesis);
                assert_eq!(missing, vec![Phase::Pre, Phase::Setup, Phase::Discovery]);
            }
            other => panic!("unexpected error: {other}"),
        }

        sm.enter_phase(Phase::Pre).unwrap();
        assert!(sm.enter_phase(Phase::Pre).is_err());
        sm.enter_phase(Phase::Setup).unwrap();
        assert_eq!(sm.snapshot().unwrap().active_phase, Some(Phase::Setup));
    }

    #[test]
    fn test_start_conflicts_while_running_or_halted() {
        let sm = manager();
        let id = sm.start().unwrap();
        assert!(matches!(
            sm.start(),
            Err(ConcordError::SessionConflict { session_id }) if session_id == id
        ));
        sm.halt("tie").unwrap();
        assert!(sm.start().is_err());
        sm.fail("gave up").unwrap();
        assert!(sm.start().is_ok());
    }

    #[test]
    fn test_halt_is_idempotent() {
        let sm = manager();
        sm.start().unwrap();
        let before = sm.log().len();
        assert!(sm.halt("tie").unwrap());
        assert!(!sm.halt("tie again").unwrap());
        assert_eq!(sm.log().len(), before + 1);
        assert_eq!(sm.snapshot().unwrap().halt_reason.as_deref(), Some("tie"));
    }

    #[test]
    fn test_finish_requires_finalize() {
        let sm = manager();
        sm.start().unwrap();
        assert!(matches!(
            sm.finish(),
            Err(ConcordError::InvalidTransition { action: "finish", .. })
        ));
        for phase in Phase::ALL {
            sm.enter_phase(phase).unwrap();
        }
        sm.finish().unwrap();
        assert_eq!(sm.snapshot().unwrap().state, SessionState::Completed);
        assert!(sm.halt("late").is_err());
        assert!(sm.fail("late").is_err());
    }

    #[test]
    fn test_halt_signal_and_resume() {
        let sm = manager();
        sm.start().unwrap();
        let rx = sm.subscribe_halt();
        assert!(!*rx.borrow());
        sm.halt("tie").unwrap();
        assert!(*rx.borrow());
        sm.resume().unwrap();
        assert!(!*rx.borrow());
        assert_eq!(sm.snapshot().unwrap().state, SessionState::Running);
        assert!(sm.resume().is_err());
    }
}
