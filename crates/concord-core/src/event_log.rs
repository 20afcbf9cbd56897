//! Append-only validation event log.
//!
//! Every lifecycle transition and validation decision is appended here with a
//! monotonically increasing `seq`, then mirrored to the injected
//! [`LearningObserver`]. The learning side is fire-and-forget; the log itself
//! is the source of truth for reports and the status query.

use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::domain::ValidationEvent;
use crate::learning::LearningObserver;

/// Shared, append-only record of [`ValidationEvent`]s.
pub struct EventLog {
    events: Mutex<Vec<ValidationEvent>>,
    observer: Arc<dyn LearningObserver>,
}

impl EventLog {
    pub fn new(observer: Arc<dyn LearningObserver>) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            observer,
        }
    }

    /// Assign the next sequence number, append, and forward to the observer.
    pub fn record(&self, mut event: ValidationEvent) -> u64 {
        let seq = {
            let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
            event.seq = events.len() as u64 + 1;
            events.push(event.clone());
            event.seq
        };
        trace!(event = "event_log.appended", seq, kind = %event.kind);
        self.observer.observe(&event);
        seq
    }

    /// The last `n` events, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ValidationEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let start = events.len().saturating_sub(n);
        events[start..].to_vec()
    }

    /// Every event with `seq` strictly greater than `seq`.
    pub fn events_since(&self, seq: u64) -> Vec<ValidationEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.iter().filter(|e| e.seq > seq).cloned().collect()
    }

    pub fn all(&self) -> Vec<ValidationEvent> {
        self.events_since(0)
    }

    pub fn last_seq(&self) -> u64 {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.last().map(|e| e.seq).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn observer(&self) -> &Arc<dyn LearningObserver> {
        &self.observer
    }
}
