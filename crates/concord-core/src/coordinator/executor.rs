//! Layered, bounded-concurrency agent execution.
//!
//! Agents of one topological layer run concurrently, capped by a
//! [`Semaphore`], and the layer is joined before the next starts. Every
//! emitted claim passes through the [`EvidenceValidator`] before the output
//! is sealed and published behind an `Arc`.
//!
//! Failure handling:
//! - producer error, panic, or deadline expiry → `Degraded` output with no
//!   claims and the inherited context kept; siblings keep running
//! - any dependency not `Published` → `UpstreamFailed` output, never invoked
//! - session halted before an agent starts → `Cancelled`; an in-flight agent
//!   finishes but its output is discarded as `Cancelled`

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::coordinator::graph::AgentGraph;
use crate::coordinator::producer::{AgentInput, AgentProducer, ProducerOutput};
use crate::correlator::{ToolCallCorrelator, ToolCallStatus};
use crate::domain::{
    AgentDescriptor, AgentId, AgentOutput, AgentStatus, ClaimRecord, ConcordError, Context,
    EventKind, EvidencePool, ReinvestigationRequest, Result, ValidationEvent,
};
use crate::event_log::EventLog;
use crate::evidence::{EvidenceValidator, EvidenceVerdict};
use crate::metrics::METRICS;
use crate::obs;

/// Producers keyed by the agent they implement.
pub type ProducerMap = BTreeMap<AgentId, Arc<dyn AgentProducer>>;

/// Execution limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Maximum number of producers in flight at once.
    pub max_concurrent: usize,
    /// Per-invocation deadline.
    pub agent_deadline_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            agent_deadline_ms: 30_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.agent_deadline_ms)
    }
}

/// Why an agent did not publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentFailure {
    ProducerError { agent: AgentId, message: String },
    Timeout { agent: AgentId, deadline_ms: u64 },
    UpstreamFailed { agent: AgentId, upstream: AgentId },
}

impl AgentFailure {
    pub fn agent(&self) -> &AgentId {
        match self {
            AgentFailure::ProducerError { agent, .. }
            | AgentFailure::Timeout { agent, .. }
            | AgentFailure::UpstreamFailed { agent, .. } => agent,
        }
    }
}

/// Session-scoped inputs to a run: who to attribute events to and when to stop.
#[derive(Debug, Clone)]
pub struct RunScope {
    pub session_id: Option<Uuid>,
    pub halt: watch::Receiver<bool>,
}

impl RunScope {
    pub fn new(session_id: Option<Uuid>, halt: watch::Receiver<bool>) -> Self {
        Self { session_id, halt }
    }

    /// A scope that never halts.
    pub fn detached() -> Self {
        let (_tx, halt) = watch::channel(false);
        Self {
            session_id: None,
            halt,
        }
    }

    fn halted(&self) -> bool {
        *self.halt.borrow()
    }
}

/// Result of one coordinated run.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorRun {
    /// One output per agent, in topological order.
    pub outputs: Vec<Arc<AgentOutput>>,
    /// Agents whose producer was actually invoked, in dispatch order.
    pub visit_order: Vec<AgentId>,
    pub failures: Vec<AgentFailure>,
}

impl CoordinatorRun {
    pub fn output(&self, agent: &AgentId) -> Option<&Arc<AgentOutput>> {
        self.outputs.iter().find(|o| &o.agent_id == agent)
    }

    /// Replace the output of `agent` in place, keeping topological order.
    pub fn replace(&mut self, output: Arc<AgentOutput>) {
        if let Some(slot) = self
            .outputs
            .iter_mut()
            .find(|o| o.agent_id == output.agent_id)
        {
            *slot = output;
        }
    }

    pub fn timed_out(&self) -> Vec<AgentId> {
        self.failures
            .iter()
            .filter(|f| matches!(f, AgentFailure::Timeout { .. }))
            .map(|f| f.agent().clone())
            .collect()
    }

    pub fn upstream_failures(&self) -> Vec<&AgentFailure> {
        self.failures
            .iter()
            .filter(|f| matches!(f, AgentFailure::UpstreamFailed { .. }))
            .collect()
    }
}

enum Invocation {
    Produced(ProducerOutput),
    Failed(String),
    TimedOut,
    Cancelled,
}

/// Runs agents over a shared evidence pool.
pub struct AgentCoordinator {
    config: CoordinatorConfig,
    validator: EvidenceValidator,
    pool: Arc<EvidencePool>,
    log: Arc<EventLog>,
    correlator: Arc<ToolCallCorrelator>,
}

impl AgentCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        validator: EvidenceValidator,
        pool: Arc<EvidencePool>,
        log: Arc<EventLog>,
        correlator: Arc<ToolCallCorrelator>,
    ) -> Self {
        Self {
            config,
            validator,
            pool,
            log,
            correlator,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Validate the graph and producer map, then run every agent.
    pub async fn run_all(
        &self,
        agents: &[AgentDescriptor],
        producers: &ProducerMap,
        scope: &RunScope,
    ) -> Result<CoordinatorRun> {
        let graph = AgentGraph::build(agents)?;
        self.run_graph(&graph, producers, scope).await
    }

    pub async fn run_graph(
        &self,
        graph: &AgentGraph,
        producers: &ProducerMap,
        scope: &RunScope,
    ) -> Result<CoordinatorRun> {
        if let Some(missing) = graph.order().into_iter().find(|id| !producers.contains_key(id)) {
            return Err(ConcordError::MissingProducer(missing));
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut published: BTreeMap<AgentId, Arc<AgentOutput>> = BTreeMap::new();
        let mut run = CoordinatorRun::default();

        for (level, layer) in graph.layers().iter().enumerate() {
            debug!(event = "coordinator.layer_started", level, agents = layer.len());
            let mut pending = Vec::new();

            for agent in layer {
                let inherited = merged_context(graph, &published, agent);

                let failed_upstream = graph
                    .ordered_dependencies(agent)
                    .into_iter()
                    .find(|dep| published.get(dep).map_or(true, |o| !o.status.is_published()));
                if let Some(upstream) = failed_upstream {
                    let output = self.upstream_failed(agent, &upstream, inherited, scope)?;
                    run.failures.push(AgentFailure::UpstreamFailed {
                        agent: agent.clone(),
                        upstream,
                    });
                    published.insert(agent.clone(), output);
                    continue;
                }

                if scope.halted() {
                    let output = Arc::new(AgentOutput::empty(
                        agent.clone(),
                        AgentStatus::Cancelled,
                        inherited,
                        0,
                    )?);
                    published.insert(agent.clone(), output);
                    continue;
                }

                let Some(producer) = producers.get(agent).cloned() else {
                    return Err(ConcordError::MissingProducer(agent.clone()));
                };
                let input = AgentInput {
                    agent_id: agent.clone(),
                    context: inherited.clone(),
                    feedback: Vec::new(),
                    attempt: 0,
                };
                run.visit_order.push(agent.clone());

                let semaphore = Arc::clone(&semaphore);
                let correlator = Arc::clone(&self.correlator);
                let halt = scope.halt.clone();
                let deadline = self.config.deadline();
                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    if *halt.borrow() {
                        return (Invocation::Cancelled, None);
                    }
                    let (invocation, correlation) =
                        invoke(producer, input, deadline, &correlator).await;
                    (invocation, Some(correlation))
                });
                pending.push((agent.clone(), inherited, handle));
            }

            // Layer barrier.
            let (slots, handles): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .map(|(agent, inherited, handle)| ((agent, inherited), handle))
                .unzip();
            let joined = join_all(handles).await;
            for ((agent, inherited), joined) in slots.into_iter().zip(joined) {
                let (invocation, correlation) = match joined {
                    Ok(joined) => joined,
                    Err(e) => (Invocation::Failed(format!("producer task aborted: {e}")), None),
                };
                let invocation = if scope.halted() {
                    Invocation::Cancelled
                } else {
                    invocation
                };
                let output = self.settle(
                    &agent,
                    inherited,
                    invocation,
                    correlation,
                    0,
                    scope,
                    &mut run.failures,
                )?;
                published.insert(agent, output);
            }
        }

        run.outputs = graph
            .order()
            .iter()
            .filter_map(|id| published.get(id).cloned())
            .collect();
        Ok(run)
    }

    /// Re-invoke one agent with feedback attached. Used by recovery.
    ///
    /// The producer runs on its own task like any first-pass invocation, so a
    /// panic settles as `Degraded` rather than unwinding into the caller.
    pub async fn rerun(
        &self,
        agent: &AgentId,
        producer: Arc<dyn AgentProducer>,
        inherited: Context,
        feedback: Vec<String>,
        attempt: u32,
        scope: &RunScope,
    ) -> Result<(Arc<AgentOutput>, Option<AgentFailure>)> {
        let input = AgentInput {
            agent_id: agent.clone(),
            context: inherited.clone(),
            feedback,
            attempt,
        };
        let correlator = Arc::clone(&self.correlator);
        let deadline = self.config.deadline();
        let handle = tokio::spawn(async move {
            let (invocation, correlation) = invoke(producer, input, deadline, &correlator).await;
            (invocation, Some(correlation))
        });
        let (invocation, correlation) = match handle.await {
            Ok(joined) => joined,
            Err(e) => (Invocation::Failed(format!("producer task aborted: {e}")), None),
        };
        let mut failures = Vec::new();
        let output = self.settle(
            agent,
            inherited,
            invocation,
            correlation,
            attempt,
            scope,
            &mut failures,
        )?;
        Ok((output, failures.pop()))
    }

    #[allow(clippy::too_many_arguments)]
    fn settle(
        &self,
        agent: &AgentId,
        inherited: Context,
        invocation: Invocation,
        correlation: Option<Uuid>,
        attempt: u32,
        scope: &RunScope,
        failures: &mut Vec<AgentFailure>,
    ) -> Result<Arc<AgentOutput>> {
        let output = match invocation {
            Invocation::Produced(produced) => {
                self.publish(agent, inherited, produced, correlation, attempt, scope)?
            }
            Invocation::Cancelled => {
                AgentOutput::empty(agent.clone(), AgentStatus::Cancelled, inherited, attempt)?
            }
            Invocation::Failed(message) => {
                failures.push(AgentFailure::ProducerError {
                    agent: agent.clone(),
                    message: message.clone(),
                });
                self.degraded(agent, inherited, message, correlation, attempt, scope)?
            }
            Invocation::TimedOut => {
                failures.push(AgentFailure::Timeout {
                    agent: agent.clone(),
                    deadline_ms: self.config.agent_deadline_ms,
                });
                let reason = format!("deadline of {}ms expired", self.config.agent_deadline_ms);
                self.degraded(agent, inherited, reason, correlation, attempt, scope)?
            }
        };
        Ok(Arc::new(output))
    }

    fn publish(
        &self,
        agent: &AgentId,
        inherited: Context,
        produced: ProducerOutput,
        correlation: Option<Uuid>,
        attempt: u32,
        scope: &RunScope,
    ) -> Result<AgentOutput> {
        let learning = self.log.observer();
        let mut claims = Vec::new();
        let mut verdicts = Vec::with_capacity(produced.claims.len());
        let mut reinvestigation = Vec::new();

        for claim in produced.claims {
            let verdict = self.validator.validate(&claim, &self.pool, learning.as_ref());
            METRICS.inc_claims_validated();
            obs::emit_claim_validated(agent.as_str(), &claim.subject, verdict.as_str(), verdict.score());
            let event = ValidationEvent::new(EventKind::ClaimValidated, verdict.as_str());
            self.log.record(
                correlated(event, correlation)
                    .with_session(scope.session_id)
                    .with_context(json!({
                        "agent": agent,
                        "subject": claim.subject,
                        "verdict": verdict.as_str(),
                        "evidence": verdict.evidence(),
                        "score": verdict.score(),
                    })),
            );

            match verdict.published_claim(&claim) {
                Some(accepted) => claims.push(accepted),
                None => {
                    if let EvidenceVerdict::InsufficientEvidence { best_score } = &verdict {
                        reinvestigation.push(ReinvestigationRequest {
                            subject: claim.subject.clone(),
                            claim: claim.clone(),
                            reason: format!(
                                "best supporting score {best_score:.2} below acceptance"
                            ),
                        });
                    }
                }
            }
            verdicts.push(ClaimRecord {
                emitted: claim,
                verdict,
            });
        }

        let output = AgentOutput::publish(
            agent.clone(),
            AgentStatus::Published,
            claims,
            verdicts,
            reinvestigation,
            inherited,
            produced.produced_context,
            attempt,
        )?;
        let event = ValidationEvent::new(EventKind::AgentPublished, "published");
        self.log.record(
            correlated(event, correlation)
                .with_session(scope.session_id)
                .with_context(json!({
                    "agent": agent,
                    "attempt": attempt,
                    "claims": output.claims.len(),
                    "reinvestigation": output.reinvestigation.len(),
                    "digest": output.digest,
                })),
        );
        Ok(output)
    }

    fn degraded(
        &self,
        agent: &AgentId,
        inherited: Context,
        reason: String,
        correlation: Option<Uuid>,
        attempt: u32,
        scope: &RunScope,
    ) -> Result<AgentOutput> {
        METRICS.inc_agents_degraded();
        obs::emit_agent_degraded(agent.as_str(), &reason);
        let event = ValidationEvent::new(EventKind::AgentDegraded, reason.clone());
        self.log.record(
            correlated(event, correlation)
                .with_session(scope.session_id)
                .with_context(json!({ "agent": agent, "attempt": attempt })),
        );
        AgentOutput::empty(agent.clone(), AgentStatus::Degraded { reason }, inherited, attempt)
    }

    fn upstream_failed(
        &self,
        agent: &AgentId,
        upstream: &AgentId,
        inherited: Context,
        scope: &RunScope,
    ) -> Result<Arc<AgentOutput>> {
        self.log.record(
            ValidationEvent::new(EventKind::AgentDegraded, "upstream_failed")
                .with_session(scope.session_id)
                .with_context(json!({ "agent": agent, "upstream": upstream })),
        );
        Ok(Arc::new(AgentOutput::empty(
            agent.clone(),
            AgentStatus::UpstreamFailed {
                upstream: upstream.clone(),
            },
            inherited,
            0,
        )?))
    }
}

fn correlated(event: ValidationEvent, correlation: Option<Uuid>) -> ValidationEvent {
    match correlation {
        Some(id) => event.with_correlation(id),
        None => event,
    }
}

/// Run one producer under its correlator span. Returns the correlation id
/// alongside the outcome.
async fn invoke(
    producer: Arc<dyn AgentProducer>,
    input: AgentInput,
    deadline: Duration,
    correlator: &ToolCallCorrelator,
) -> (Invocation, Uuid) {
    let agent = input.agent_id.clone();
    let call = correlator.begin(format!("agent:{agent}"));
    let started = Instant::now();
    let result = tokio::time::timeout(deadline, producer.produce(input).instrument(call.span())).await;

    let (invocation, status) = match result {
        Ok(Ok(produced)) => (Invocation::Produced(produced), ToolCallStatus::Succeeded),
        Ok(Err(e)) => (Invocation::Failed(format!("{e:#}")), ToolCallStatus::Failed),
        Err(_) => (Invocation::TimedOut, ToolCallStatus::TimedOut),
    };
    let correlation = call.id();
    correlator.finish(call, status);
    let claims = match &invocation {
        Invocation::Produced(p) => p.claims.len(),
        _ => 0,
    };
    obs::emit_agent_finished(
        agent.as_str(),
        &format!("{status:?}").to_lowercase(),
        claims,
        started.elapsed().as_millis(),
    );
    (invocation, correlation)
}

/// Inherited context for `agent`: each dependency's own inherited context,
/// then its produced context, in topological order. Later producers win.
pub fn merged_context(
    graph: &AgentGraph,
    outputs: &BTreeMap<AgentId, Arc<AgentOutput>>,
    agent: &AgentId,
) -> Context {
    let mut merged = Context::new();
    for dep in graph.ordered_dependencies(agent) {
        if let Some(output) = outputs.get(&dep) {
            merged.extend(
                output
                    .inherited_context
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
            merged.extend(
                output
                    .produced_context
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::producer::FnProducer;
    use crate::domain::{Claim, Evidence, SourceKind};
    use crate::learning::NoopLearning;
    use serde_json::json;

    fn coordinator(config: CoordinatorConfig) -> AgentCoordinator {
        let pool = EvidencePool::new().with(Evidence::new(
            "src-1",
            SourceKind::PrimaryImplementation,
            "field-X",
            json!("A"),
        ));
        AgentCoordinator::new(
            config,
            EvidenceValidator::default(),
            Arc::new(pool),
            Arc::new(EventLog::new(Arc::new(NoopLearning))),
            Arc::new(ToolCallCorrelator::default()),
        )
    }

    fn emits(key: &'static str, value: &'static str) -> Arc<dyn AgentProducer> {
        FnProducer::shared(move |_input: AgentInput| async move {
            Ok(ProducerOutput::new().context(key, json!(value)))
        })
    }

    #[tokio::test]
    async fn test_context_flows_and_last_producer_wins() {
        let agents = vec![
            AgentDescriptor::new("a"),
            AgentDescriptor::new("b").depends_on("a"),
            AgentDescriptor::new("c").depends_on("a").depends_on("b"),
        ];
        let mut producers = ProducerMap::new();
        producers.insert("a".into(), emits("k", "from-a"));
        producers.insert("b".into(), emits("k", "from-b"));
        producers.insert("c".into(), emits("other", "x"));

        let run = coordinator(CoordinatorConfig::default())
            .run_all(&agents, &producers, &RunScope::detached())
            .await
            .unwrap();
        let c = run.output(&"c".into()).unwrap();
        assert_eq!(c.inherited_context["k"], json!("from-b"));
        assert_eq!(
            run.visit_order,
            vec![AgentId::new("a"), AgentId::new("b"), AgentId::new("c")]
        );
    }

    #[tokio::test]
    async fn test_failure_degrades_and_blocks_dependents_only() {
        let agents = vec![
            AgentDescriptor::new("bad"),
            AgentDescriptor::new("good"),
            AgentDescriptor::new("child").depends_on("bad"),
        ];
        let mut producers = ProducerMap::new();
        producers.insert(
            "bad".into(),
            FnProducer::shared(|_input: AgentInput| async move {
                Err::<ProducerOutput, _>(anyhow::anyhow!("scanner refused"))
            }),
        );
        producers.insert("good".into(), emits("k", "v"));
        producers.insert("child".into(), emits("k", "v"));

        let run = coordinator(CoordinatorConfig::default())
            .run_all(&agents, &producers, &RunScope::detached())
            .await
            .unwrap();
        assert!(matches!(
            run.output(&"bad".into()).unwrap().status,
            AgentStatus::Degraded { .. }
        ));
        assert!(run.output(&"good".into()).unwrap().status.is_published());
        assert_eq!(
            run.output(&"child".into()).unwrap().status,
            AgentStatus::UpstreamFailed {
                upstream: "bad".into()
            }
        );
        assert_eq!(run.upstream_failures().len(), 1);
        assert!(!run.visit_order.contains(&AgentId::new("child")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_degrades() {
        let agents = vec![AgentDescriptor::new("slow")];
        let mut producers = ProducerMap::new();
        producers.insert(
            "slow".into(),
            FnProducer::shared(|_input: AgentInput| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(ProducerOutput::new())
            }),
        );
        let config = CoordinatorConfig {
            agent_deadline_ms: 100,
            ..CoordinatorConfig::default()
        };
        let run = coordinator(config)
            .run_all(&agents, &producers, &RunScope::detached())
            .await
            .unwrap();
        assert_eq!(run.timed_out(), vec![AgentId::new("slow")]);
    }

    #[tokio::test]
    async fn test_claims_are_validated_before_publication() {
        let agents = vec![AgentDescriptor::new("miner")];
        let mut producers = ProducerMap::new();
        producers.insert(
            "miner".into(),
            FnProducer::shared(|_input: AgentInput| async move {
                Ok(ProducerOutput::new()
                    .claim(Claim::new("field-X", json!("B")).citing("doc"))
                    .claim(Claim::new("field-Y", json!(1))))
            }),
        );
        let run = coordinator(CoordinatorConfig::default())
            .run_all(&agents, &producers, &RunScope::detached())
            .await
            .unwrap();
        let out = run.output(&"miner".into()).unwrap();
        assert_eq!(out.verdicts.len(), 2);
        assert_eq!(out.claims.len(), 1);
        assert_eq!(out.claims[0].asserted_value, json!("A"));
        assert_eq!(out.reinvestigation.len(), 1);
        assert_eq!(out.reinvestigation[0].subject, "field-Y");
        assert!(out.verify().is_ok());
    }

    #[tokio::test]
    async fn test_halted_scope_cancels_everything() {
        let (tx, rx) = watch::channel(true);
        let agents = vec![AgentDescriptor::new("a")];
        let mut producers = ProducerMap::new();
        producers.insert("a".into(), emits("k", "v"));
        let run = coordinator(CoordinatorConfig::default())
            .run_all(&agents, &producers, &RunScope::new(None, rx))
            .await
            .unwrap();
        drop(tx);
        assert_eq!(run.outputs[0].status, AgentStatus::Cancelled);
        assert!(run.visit_order.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_producer_degrades_without_stopping_siblings() {
        let agents = vec![AgentDescriptor::new("crashy"), AgentDescriptor::new("steady")];
        let mut producers = ProducerMap::new();
        producers.insert(
            "crashy".into(),
            FnProducer::shared(|input: AgentInput| async move {
                if input.feedback.is_empty() {
                    panic!("crashy lost its footing");
                }
                Ok(ProducerOutput::new())
            }),
        );
        producers.insert("steady".into(), emits("k", "v"));

        let run = coordinator(CoordinatorConfig::default())
            .run_all(&agents, &producers, &RunScope::detached())
            .await
            .unwrap();
        match &run.output(&"crashy".into()).unwrap().status {
            AgentStatus::Degraded { reason } => assert!(reason.contains("aborted")),
            other => panic!("expected degraded, got {other:?}"),
        }
        assert!(run.output(&"steady".into()).unwrap().status.is_published());
        assert!(matches!(
            run.failures.as_slice(),
            [AgentFailure::ProducerError { .. }]
        ));
    }

    #[tokio::test]
    async fn test_rerun_panic_settles_as_degraded() {
        let producer = FnProducer::shared(|input: AgentInput| async move {
            if !input.feedback.is_empty() {
                panic!("rerun blew up");
            }
            Ok(ProducerOutput::new())
        });

        let (output, failure) = coordinator(CoordinatorConfig::default())
            .rerun(
                &"b".into(),
                producer,
                Context::new(),
                vec!["recheck mode".into()],
                1,
                &RunScope::detached(),
            )
            .await
            .unwrap();
        assert!(matches!(output.status, AgentStatus::Degraded { .. }));
        assert_eq!(output.attempt, 1);
        assert!(matches!(
            failure,
            Some(AgentFailure::ProducerError { ref agent, .. }) if agent.as_str() == "b"
        ));
    }

    #[tokio::test]
    async fn test_halt_while_in_flight_discards_output() {
        let (tx, rx) = watch::channel(false);
        let tx = Arc::new(tx);
        let agents = vec![
            AgentDescriptor::new("a"),
            AgentDescriptor::new("b").depends_on("a"),
        ];
        let mut producers = ProducerMap::new();
        let halter = Arc::clone(&tx);
        producers.insert(
            "a".into(),
            FnProducer::shared(move |_input: AgentInput| {
                let halter = Arc::clone(&halter);
                async move {
                    let _ = halter.send(true);
                    Ok(ProducerOutput::new().context("k", json!("late")))
                }
            }),
        );
        producers.insert("b".into(), emits("k", "v"));

        let run = coordinator(CoordinatorConfig::default())
            .run_all(&agents, &producers, &RunScope::new(None, rx))
            .await
            .unwrap();
        let a = run.output(&"a".into()).unwrap();
        assert_eq!(a.status, AgentStatus::Cancelled);
        assert!(a.produced_context.is_empty());
        assert_eq!(run.visit_order, vec![AgentId::new("a")]);
        assert!(!run.output(&"b".into()).unwrap().status.is_published());
    }

    #[tokio::test]
    async fn test_missing_producer_is_rejected() {
        let agents = vec![AgentDescriptor::new("a")];
        let err = coordinator(CoordinatorConfig::default())
            .run_all(&agents, &ProducerMap::new(), &RunScope::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, ConcordError::MissingProducer(_)));
    }
}
