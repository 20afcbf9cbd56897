//! Agent Coordinator: dependency-ordered, bounded-concurrency agent runs.
//!
//! # Module layout
//!
//! - [`graph`]: `AgentGraph`, Kahn level ordering, cycle detection
//! - [`producer`]: `AgentProducer` boundary, `AgentInput`, `FnProducer`
//! - [`executor`]: `AgentCoordinator::run_all`, context merge, `rerun`

pub mod executor;
pub mod graph;
pub mod producer;

pub use executor::{
    merged_context, AgentCoordinator, AgentFailure, CoordinatorConfig, CoordinatorRun,
    ProducerMap, RunScope,
};
pub use graph::AgentGraph;
pub use producer::{AgentInput, AgentProducer, FnProducer, ProducerOutput};
