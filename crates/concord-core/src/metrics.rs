//! Global atomic counters for Concord observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (the orchestrator does so at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters without allocation or locking.
pub struct Metrics {
    claims_validated: AtomicU64,
    conflicts_detected: AtomicU64,
    agents_degraded: AtomicU64,
    recovery_attempts: AtomicU64,
    learning_dropped: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            claims_validated: AtomicU64::new(0),
            conflicts_detected: AtomicU64::new(0),
            agents_degraded: AtomicU64::new(0),
            recovery_attempts: AtomicU64::new(0),
            learning_dropped: AtomicU64::new(0),
        }
    }

    pub fn inc_claims_validated(&self) {
        self.claims_validated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "claims_validated", "counter incremented");
    }

    pub fn add_conflicts_detected(&self, n: u64) {
        self.conflicts_detected.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "conflicts_detected", n, "counter incremented");
    }

    pub fn inc_agents_degraded(&self) {
        self.agents_degraded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "agents_degraded", "counter incremented");
    }

    pub fn inc_recovery_attempts(&self) {
        self.recovery_attempts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "recovery_attempts", "counter incremented");
    }

    /// Learning events dropped because the queue was full.
    pub fn inc_learning_dropped(&self) {
        self.learning_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            claims_validated = self.claims_validated(),
            conflicts_detected = self.conflicts_detected(),
            agents_degraded = self.agents_degraded(),
            recovery_attempts = self.recovery_attempts(),
            learning_dropped = self.learning_dropped(),
        );
    }

    pub fn claims_validated(&self) -> u64 {
        self.claims_validated.load(Ordering::Relaxed)
    }

    pub fn conflicts_detected(&self) -> u64 {
        self.conflicts_detected.load(Ordering::Relaxed)
    }

    pub fn agents_degraded(&self) -> u64 {
        self.agents_degraded.load(Ordering::Relaxed)
    }

    pub fn recovery_attempts(&self) -> u64 {
        self.recovery_attempts.load(Ordering::Relaxed)
    }

    pub fn learning_dropped(&self) -> u64 {
        self.learning_dropped.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.claims_validated.store(0, Ordering::Relaxed);
        self.conflicts_detected.store(0, Ordering::Relaxed);
        self.agents_degraded.store(0, Ordering::Relaxed);
        self.recovery_attempts.store(0, Ordering::Relaxed);
        self.learning_dropped.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.claims_validated(), 0);
        m.inc_claims_validated();
        m.inc_claims_validated();
        assert_eq!(m.claims_validated(), 2);

        m.add_conflicts_detected(3);
        assert_eq!(m.conflicts_detected(), 3);

        m.inc_recovery_attempts();
        m.inc_agents_degraded();
        m.inc_learning_dropped();
        assert_eq!(m.recovery_attempts(), 1);
        assert_eq!(m.agents_degraded(), 1);
        assert_eq!(m.learning_dropped(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_claims_validated();
        m.add_conflicts_detected(2);
        m.inc_recovery_attempts();
        m.reset();
        assert_eq!(m.claims_validated(), 0);
        assert_eq!(m.conflicts_detected(), 0);
        assert_eq!(m.recovery_attempts(), 0);
    }
}
