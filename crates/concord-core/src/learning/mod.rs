//! Learning Core: an advisory-only, fail-safe observer of validation outcomes.
//!
//! # Module layout
//!
//! - [`observer`]: `LearningObserver` capability, `NoopLearning`, `Insight`
//! - [`store`]: `PatternStore`, `InMemoryPatternStore`, `Pattern`
//! - [`engine`]: `LearningCore` worker pool, queue and circuit breaker
//! - [`error`]: `LearningError` (never escapes this module's boundary)

pub mod engine;
pub mod error;
pub mod observer;
pub mod store;

pub use engine::{LearningConfig, LearningCore, LearningIntensity};
pub use error::{LearningError, LearningResult};
pub use observer::{
    AdviceContext, AdviceKind, Insight, LearningObserver, LearningStatus, NoopLearning,
};
pub use store::{InMemoryPatternStore, Pattern, PatternStore};
