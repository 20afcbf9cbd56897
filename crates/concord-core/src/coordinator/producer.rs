//! The boundary between the coordinator and agent implementations.
//!
//! Producers are external collaborators, so they report failures as
//! `anyhow::Error`; the coordinator turns any error into a degraded output
//! rather than propagating it.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AgentId, Claim, Context};

/// Everything an agent receives for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInput {
    pub agent_id: AgentId,
    /// Merged context of all dependencies.
    pub context: Context,
    /// Unresolved claims from a previous attempt, with the reason each was rejected.
    pub feedback: Vec<String>,
    /// 0 on the first run.
    pub attempt: u32,
}

/// What a producer hands back before evidence validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProducerOutput {
    pub claims: Vec<Claim>,
    pub produced_context: Context,
}

impl ProducerOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(mut self, claim: Claim) -> Self {
        self.claims.push(claim);
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.produced_context.insert(key.into(), value);
        self
    }
}

#[async_trait]
pub trait AgentProducer: Send + Sync + 'static {
    async fn produce(&self, input: AgentInput) -> anyhow::Result<ProducerOutput>;
}

/// Adapts an async closure into an [`AgentProducer`].
pub struct FnProducer<F> {
    f: F,
}

impl<F, Fut> FnProducer<F>
where
    F: Fn(AgentInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ProducerOutput>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn shared(f: F) -> Arc<dyn AgentProducer> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> AgentProducer for FnProducer<F>
where
    F: Fn(AgentInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ProducerOutput>> + Send + 'static,
{
    async fn produce(&self, input: AgentInput) -> anyhow::Result<ProducerOutput> {
        (self.f)(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_producer_forwards_input() {
        let producer = FnProducer::shared(|input: AgentInput| async move {
            Ok(ProducerOutput::new()
                .claim(Claim::new("attempt", json!(input.attempt)))
                .context("seen_by", json!(input.agent_id.as_str())))
        });
        let out = producer
            .produce(AgentInput {
                agent_id: AgentId::new("miner"),
                context: Context::new(),
                feedback: Vec::new(),
                attempt: 2,
            })
            .await
            .unwrap();
        assert_eq!(out.claims[0].asserted_value, json!(2));
        assert_eq!(out.produced_context["seen_by"], json!("miner"));
    }
}
