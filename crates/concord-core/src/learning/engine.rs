//! Background learning engine.
//!
//! Events arrive through a bounded `mpsc` channel drained by a fixed pool of
//! worker tasks. `observe` uses `try_send` and drops on a full queue, so
//! producers are never blocked. Internal failures feed a consecutive-failure
//! circuit breaker; once it opens, `observe` and `advise` become no-ops until
//! [`LearningCore::reset`] is called.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::ValidationEvent;
use crate::learning::error::{LearningError, LearningResult};
use crate::learning::observer::{AdviceContext, Insight, LearningObserver, LearningStatus};
use crate::learning::store::{InMemoryPatternStore, Pattern, PatternStore};
use crate::metrics::METRICS;

/// How much the learning subsystem is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningIntensity {
    /// Record events and derive patterns; never answer `advise`.
    Passive,
    /// Also hand out insights for search ordering.
    Advisory,
}

/// Learning subsystem configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub enabled: bool,
    pub intensity: LearningIntensity,
    pub queue_capacity: usize,
    pub workers: usize,
    /// Consecutive internal failures before the breaker opens.
    pub breaker_threshold: u32,
    /// Observations per subject before an insight is offered.
    pub min_observations: u32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            intensity: LearningIntensity::Passive,
            queue_capacity: 1024,
            workers: 2,
            breaker_threshold: 5,
            min_observations: 3,
        }
    }
}

#[derive(Debug)]
struct CircuitBreaker {
    threshold: u32,
    consecutive: AtomicU32,
    open: AtomicBool,
}

impl CircuitBreaker {
    fn new(threshold: u32) -> Self {
        Self {
            threshold,
            consecutive: AtomicU32::new(0),
            open: AtomicBool::new(false),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn record_failure(&self, error: &LearningError) {
        let failures = self.consecutive.fetch_add(1, Ordering::AcqRel) + 1;
        warn!(event = "learning.failure", error = %error, consecutive = failures);
        if self.threshold > 0 && failures >= self.threshold && !self.open.swap(true, Ordering::AcqRel) {
            warn!(event = "learning.breaker_open", consecutive = failures);
        }
    }

    fn record_success(&self) {
        self.consecutive.store(0, Ordering::Release);
    }

    fn reset(&self) {
        self.consecutive.store(0, Ordering::Release);
        self.open.store(false, Ordering::Release);
    }
}

struct Shared {
    store: Mutex<Box<dyn PatternStore>>,
    breaker: CircuitBreaker,
    enqueued: AtomicU64,
    handled: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn process(&self, event: &ValidationEvent) {
        if self.breaker.is_open() {
            return;
        }
        let result = match self.store.lock() {
            Ok(mut store) => store.record(event),
            Err(_) => Err(LearningError::StorePoisoned),
        };
        match result {
            Ok(()) => {
                self.breaker.record_success();
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.breaker.record_failure(&e);
            }
        }
    }

    fn insight(&self, context: &AdviceContext) -> LearningResult<Option<Insight>> {
        // Never wait on the store from the validation path.
        match self.store.try_lock() {
            Ok(store) => store.insight(context),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(_)) => Err(LearningError::StorePoisoned),
        }
    }
}

/// Asynchronous, best-effort learning observer.
pub struct LearningCore {
    config: LearningConfig,
    sender: mpsc::Sender<ValidationEvent>,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl LearningCore {
    /// Spawn the worker pool with the default in-memory store.
    ///
    /// Must be called from within a Tokio runtime; panics otherwise. Use
    /// [`LearningCore::try_spawn`] where that is not guaranteed.
    pub fn spawn(config: LearningConfig) -> Arc<Self> {
        let store = InMemoryPatternStore::new(config.min_observations);
        Self::spawn_with_store(config, Box::new(store))
    }

    /// Like [`LearningCore::spawn`], but reports a missing runtime instead
    /// of panicking.
    pub fn try_spawn(config: LearningConfig) -> LearningResult<Arc<Self>> {
        tokio::runtime::Handle::try_current().map_err(|_| LearningError::NoRuntime)?;
        Ok(Self::spawn(config))
    }

    /// Spawn the worker pool around a caller-supplied store.
    pub fn spawn_with_store(config: LearningConfig, store: Box<dyn PatternStore>) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let shared = Arc::new(Shared {
            store: Mutex::new(store),
            breaker: CircuitBreaker::new(config.breaker_threshold),
            enqueued: AtomicU64::new(0),
            handled: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(event) = next else {
                            debug!(event = "learning.worker_stopped", worker);
                            break;
                        };
                        shared.process(&event);
                        shared.handled.fetch_add(1, Ordering::AcqRel);
                    }
                })
            })
            .collect();

        Arc::new(Self {
            config,
            sender,
            shared,
            workers,
        })
    }

    /// Close the breaker and clear the failure count.
    pub fn reset(&self) {
        self.shared.breaker.reset();
        debug!(event = "learning.breaker_reset");
    }

    /// Wait until every enqueued event has been handled by a worker.
    pub async fn wait_idle(&self) {
        while self.shared.handled.load(Ordering::Acquire)
            < self.shared.enqueued.load(Ordering::Acquire)
        {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }

    /// Snapshot of derived patterns. Waits on the store lock; diagnostics only.
    pub fn patterns(&self) -> Vec<Pattern> {
        match self.shared.store.lock() {
            Ok(store) => store.patterns(),
            Err(_) => Vec::new(),
        }
    }

    fn is_active(&self) -> bool {
        self.config.enabled && !self.shared.breaker.is_open()
    }
}

impl Drop for LearningCore {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl LearningObserver for LearningCore {
    fn observe(&self, event: &ValidationEvent) {
        if !self.is_active() {
            return;
        }
        match self.sender.try_send(event.clone()) {
            Ok(()) => {
                self.shared.enqueued.fetch_add(1, Ordering::AcqRel);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                METRICS.inc_learning_dropped();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.breaker.record_failure(&LearningError::QueueClosed);
            }
        }
    }

    fn advise(&self, context: &AdviceContext) -> Option<Insight> {
        if !self.is_active() || self.config.intensity != LearningIntensity::Advisory {
            return None;
        }
        match self.shared.insight(context) {
            Ok(insight) => insight,
            Err(e) => {
                self.shared.breaker.record_failure(&e);
                None
            }
        }
    }

    fn status(&self) -> LearningStatus {
        LearningStatus {
            enabled: self.config.enabled,
            advisory: self.config.intensity == LearningIntensity::Advisory,
            breaker_open: self.shared.breaker.is_open(),
            consecutive_failures: self.shared.breaker.consecutive.load(Ordering::Acquire),
            dropped_events: self.shared.dropped.load(Ordering::Relaxed),
            processed_events: self.shared.processed.load(Ordering::Relaxed),
            failed_events: self.shared.failed.load(Ordering::Relaxed),
        }
    }
}
