//! End-to-end run: one session driven through every phase.
//!
//! Pre validates the agent graph, Discovery runs the coordinator, Synthesis
//! takes stock of what needs re-investigation, Reconciliation settles
//! cross-agent conflicts, and Finalize completes the session. Failures are
//! routed through the [`RecoveryManager`]; whatever recovery cannot fix ends
//! the session as `Failed` with a [`FatalReport`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::config::ConcordConfig;
use crate::coordinator::{
    merged_context, AgentCoordinator, AgentFailure, AgentGraph, CoordinatorRun, ProducerMap,
    RunScope,
};
use crate::correlator::ToolCallCorrelator;
use crate::domain::{
    AgentDescriptor, AgentId, AgentOutput, AgentStatus, ConcordError, EventKind, EvidencePool,
    FatalReport, Result, RunReport, ValidationEvent,
};
use crate::event_log::EventLog;
use crate::evidence::EvidenceValidator;
use crate::learning::{LearningCore, LearningObserver, NoopLearning};
use crate::metrics::METRICS;
use crate::obs;
use crate::reconcile::{CrossAgentValidator, ReconciliationResult};
use crate::recovery::{
    FailureCondition, FailureSignal, RecoveryAttemptResult, RecoveryDecision, RecoveryHandler,
    RecoveryLog, RecoveryManager,
};
use crate::session::{Phase, SessionManager, SessionState};
use crate::status::HealthStatus;

/// Owns every component of one orchestration deployment.
pub struct Orchestrator {
    config: ConcordConfig,
    pool: Arc<EvidencePool>,
    log: Arc<EventLog>,
    sessions: SessionManager,
    correlator: Arc<ToolCallCorrelator>,
    coordinator: AgentCoordinator,
    reconciler: CrossAgentValidator,
    recovery: RecoveryManager,
}

impl Orchestrator {
    pub fn new(
        config: ConcordConfig,
        pool: EvidencePool,
        learning: Arc<dyn LearningObserver>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(pool);
        let log = Arc::new(EventLog::new(learning));
        let correlator = Arc::new(ToolCallCorrelator::default());
        let validator = EvidenceValidator::new(config.evidence.clone());

        Ok(Self {
            sessions: SessionManager::new(Arc::clone(&log)),
            coordinator: AgentCoordinator::new(
                config.coordinator.clone(),
                validator.clone(),
                Arc::clone(&pool),
                Arc::clone(&log),
                Arc::clone(&correlator),
            ),
            reconciler: CrossAgentValidator::new(config.reconcile.clone(), validator),
            recovery: RecoveryManager::new(config.recovery.clone(), Arc::clone(&log)),
            config,
            pool,
            log,
            correlator,
        })
    }

    /// Build with the learning layer `config.learning` asks for.
    ///
    /// Enabled learning spawns worker tasks, so this must then run inside a
    /// Tokio runtime; outside one it fails with [`ConcordError::Config`].
    pub fn from_config(config: ConcordConfig, pool: EvidencePool) -> Result<Self> {
        let learning: Arc<dyn LearningObserver> = if config.learning.enabled {
            LearningCore::try_spawn(config.learning.clone())
                .map_err(|e| ConcordError::Config(e.to_string()))?
        } else {
            Arc::new(NoopLearning)
        };
        Self::new(config, pool, learning)
    }

    pub fn config(&self) -> &ConcordConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn event_log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn pool(&self) -> &EvidencePool {
        &self.pool
    }

    pub fn correlator(&self) -> &Arc<ToolCallCorrelator> {
        &self.correlator
    }

    /// Snapshot for operators. `history` is capped by `status_history`.
    pub fn status(&self, history: usize) -> HealthStatus {
        let history = history.min(self.config.status_history);
        HealthStatus {
            session: self.sessions.snapshot(),
            recent_events: self.log.recent(history),
            recent_tool_calls: self.correlator.recent(history),
            learning: self.log.observer().status(),
        }
    }

    /// Run every agent to a reconciled, canonical view.
    pub async fn run(
        &self,
        agents: &[AgentDescriptor],
        producers: &ProducerMap,
    ) -> Result<RunReport> {
        let started = Instant::now();
        let mut recovery = Vec::new();

        let session_id = match self.sessions.start() {
            Ok(id) => id,
            Err(e @ ConcordError::SessionConflict { .. }) => {
                let signal = FailureSignal::new(FailureCondition::SessionConflict, e.to_string());
                let mut handler = StartRetry {
                    sessions: &self.sessions,
                    started: None,
                };
                let log = self.recovery.execute(None, signal, &mut handler).await;
                recovery.push(log);
                match handler.started {
                    Some(id) => id,
                    None => {
                        let mut report = FatalReport::new(
                            "another session stayed active through every retry",
                            None,
                        );
                        report.recovery = recovery;
                        return Err(ConcordError::Fatal(Box::new(report)));
                    }
                }
            }
            Err(e) => return Err(e),
        };

        let outcome = self
            .drive(session_id, agents, producers, recovery, started)
            .instrument(obs::run_span(session_id))
            .await;

        match outcome {
            Ok(report) => Ok(report),
            Err(ConcordError::Fatal(report)) => Err(ConcordError::Fatal(report)),
            Err(e) => {
                let open = self
                    .sessions
                    .snapshot()
                    .is_some_and(|s| s.id == session_id && !s.state.is_terminal());
                if open {
                    if let Err(fail_err) = self.sessions.fail(&e.to_string()) {
                        warn!(event = "run.fail_transition_rejected", error = %fail_err);
                    }
                }
                obs::emit_run_finished(session_id, SessionState::Failed, started.elapsed().as_millis());
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        session_id: Uuid,
        agents: &[AgentDescriptor],
        producers: &ProducerMap,
        mut recovery: Vec<RecoveryLog>,
        started: Instant,
    ) -> Result<RunReport> {
        let scope = RunScope::new(Some(session_id), self.sessions.subscribe_halt());

        self.sessions.enter_phase(Phase::Pre)?;
        let graph = plan(agents, producers)?;

        self.sessions.enter_phase(Phase::Setup)?;
        debug!(
            event = "pipeline.setup",
            agents = graph.len(),
            evidence = self.pool.len(),
            layers = graph.layers().len()
        );

        self.sessions.enter_phase(Phase::Discovery)?;
        let mut run = self.coordinator.run_graph(&graph, producers, &scope).await?;

        let timed_out = run.timed_out();
        if !timed_out.is_empty() {
            let signal = FailureSignal::new(
                FailureCondition::AgentTimeout,
                format!("{} agent(s) missed their deadline", timed_out.len()),
            )
            .with_agents(timed_out);
            let mut handler = TimeoutRecovery {
                orchestrator: self,
                graph: &graph,
                producers,
                run: &mut run,
                scope: &scope,
            };
            let log = self.recovery.execute(Some(session_id), signal, &mut handler).await;
            recovery.push(log);
        }

        if let Some((agent, upstream)) = first_upstream_failure(&run) {
            let error = ConcordError::UpstreamAgentFailed {
                agent: agent.clone(),
                upstream: upstream.clone(),
            };
            let signal = FailureSignal::new(FailureCondition::UpstreamAgentFailed, error.to_string())
                .with_agents([agent, upstream]);
            let log = self
                .recovery
                .execute(Some(session_id), signal, &mut Unrecoverable)
                .await;
            recovery.push(log);
            return Err(self.fatal(session_id, &error.to_string(), None, recovery));
        }

        self.sessions.enter_phase(Phase::Synthesis)?;
        let pending: usize = run.outputs.iter().map(|o| o.reinvestigation.len()).sum();
        debug!(
            event = "pipeline.synthesis",
            outputs = run.outputs.len(),
            reinvestigation = pending
        );

        self.sessions.enter_phase(Phase::Reconciliation)?;
        let mut reconciliation = self.reconcile(&run, session_id)?;
        if reconciliation.is_blocked() {
            let reason = reconciliation.to_error().to_string();
            self.sessions.halt(&reason)?;
            let signal = FailureSignal::new(FailureCondition::Blocked, reason)
                .with_agents(reconciliation.reinvestigation_targets().into_keys());
            let mut handler = ReinvestigationRecovery {
                orchestrator: self,
                session_id,
                graph: &graph,
                producers,
                run: &mut run,
                latest: &mut reconciliation,
                scope: &scope,
            };
            let log = self.recovery.execute(Some(session_id), signal, &mut handler).await;
            let recovered = log.recovered();
            recovery.push(log);
            if !recovered {
                return Err(self.fatal(
                    session_id,
                    "reconciliation stayed blocked after recovery was exhausted",
                    Some(&reconciliation),
                    recovery,
                ));
            }
        }

        self.sessions.enter_phase(Phase::Finalize)?;
        self.sessions.finish()?;
        METRICS.flush();

        let duration_ms = started.elapsed().as_millis();
        obs::emit_run_finished(session_id, SessionState::Completed, duration_ms);
        Ok(RunReport {
            session_id,
            outputs: run.outputs.iter().map(|o| AgentOutput::clone(o)).collect(),
            reconciliation,
            recovery,
            events: self.session_events(session_id),
            duration_ms: u64::try_from(duration_ms).unwrap_or(u64::MAX),
        })
    }

    /// Reconcile and record one event per resolution plus a summary event.
    fn reconcile(&self, run: &CoordinatorRun, session_id: Uuid) -> Result<ReconciliationResult> {
        let result = self
            .reconciler
            .reconcile(&run.outputs, &self.pool, self.log.observer().as_ref())?;
        METRICS.add_conflicts_detected(result.conflicts.len() as u64);

        for resolution in &result.resolutions {
            self.log.record(
                ValidationEvent::new(EventKind::ConflictResolved, resolution.strategy.as_str())
                    .with_session(Some(session_id))
                    .with_context(json!({
                        "subject": resolution.conflict.subject,
                        "kind": resolution.conflict.kind,
                        "strategy": resolution.strategy.as_str(),
                        "agents": [resolution.conflict.claim_a.agent, resolution.conflict.claim_b.agent],
                        "chosen": resolution.chosen.as_ref().map(|c| &c.agent),
                        "rationale": resolution.rationale,
                    })),
            );
        }

        let outcome = if result.is_blocked() { "blocked" } else { "resolved" };
        self.log.record(
            ValidationEvent::new(EventKind::ReconciliationCompleted, outcome)
                .with_session(Some(session_id))
                .with_context(json!({
                    "conflicts": result.conflicts.len(),
                    "accepted_fraction": result.accepted_fraction,
                    "block_reasons": result.block_reasons,
                })),
        );
        obs::emit_reconciliation(
            !result.is_blocked(),
            result.conflicts.len(),
            result.accepted_fraction,
        );
        Ok(result)
    }

    /// Re-invoke `agent` against the current outputs of its dependencies.
    /// Returns the failure if it still did not publish; an agent whose
    /// dependencies are not all published is left untouched. A published
    /// output is never replaced by a failed re-invocation.
    #[allow(clippy::too_many_arguments)]
    async fn reinvoke(
        &self,
        graph: &AgentGraph,
        producers: &ProducerMap,
        run: &mut CoordinatorRun,
        agent: &AgentId,
        feedback: Vec<String>,
        attempt: u32,
        scope: &RunScope,
    ) -> Result<Option<AgentFailure>> {
        let current: BTreeMap<AgentId, Arc<AgentOutput>> = run
            .outputs
            .iter()
            .map(|o| (o.agent_id.clone(), Arc::clone(o)))
            .collect();

        let blocked_by = graph
            .ordered_dependencies(agent)
            .into_iter()
            .find(|dep| current.get(dep).map_or(true, |o| !o.status.is_published()));
        if let Some(upstream) = blocked_by {
            return Ok(Some(AgentFailure::UpstreamFailed {
                agent: agent.clone(),
                upstream,
            }));
        }

        let producer = producers
            .get(agent)
            .cloned()
            .ok_or_else(|| ConcordError::MissingProducer(agent.clone()))?;
        let inherited = merged_context(graph, &current, agent);
        let (output, failure) = self
            .coordinator
            .rerun(agent, producer, inherited, feedback, attempt, scope)
            .await?;
        let keep_previous = failure.is_some()
            && current.get(agent).is_some_and(|o| o.status.is_published());
        if keep_previous {
            debug!(event = "pipeline.reinvoke_kept_previous", agent = %agent, attempt);
        } else {
            run.replace(output);
        }
        Ok(failure)
    }

    /// Mark the session failed and package everything needed to audit it.
    fn fatal(
        &self,
        session_id: Uuid,
        summary: &str,
        reconciliation: Option<&ReconciliationResult>,
        recovery: Vec<RecoveryLog>,
    ) -> ConcordError {
        if let Err(e) = self.sessions.fail(summary) {
            warn!(event = "run.fail_transition_rejected", error = %e);
        }
        let mut report = FatalReport::new(summary, Some(session_id));
        if let Some(result) = reconciliation {
            report.unresolved = result.halted().map(|r| r.conflict.clone()).collect();
            report.block_reasons = result.block_reasons.clone();
        }
        report.recovery = recovery;
        report.events = self.session_events(session_id);
        warn!(
            event = "run.fatal",
            session_id = %session_id,
            summary,
            unresolved = report.unresolved.len()
        );
        ConcordError::Fatal(Box::new(report))
    }

    fn session_events(&self, session_id: Uuid) -> Vec<ValidationEvent> {
        self.log
            .all()
            .into_iter()
            .filter(|e| e.session_id == Some(session_id))
            .collect()
    }
}

/// Build the graph and check every agent has a producer.
fn plan(agents: &[AgentDescriptor], producers: &ProducerMap) -> Result<AgentGraph> {
    let graph = AgentGraph::build(agents)?;
    if let Some(missing) = graph.order().into_iter().find(|id| !producers.contains_key(id)) {
        return Err(ConcordError::MissingProducer(missing));
    }
    Ok(graph)
}

fn first_upstream_failure(run: &CoordinatorRun) -> Option<(AgentId, AgentId)> {
    run.outputs.iter().find_map(|o| match &o.status {
        AgentStatus::UpstreamFailed { upstream } => Some((o.agent_id.clone(), upstream.clone())),
        _ => None,
    })
}

struct StartRetry<'a> {
    sessions: &'a SessionManager,
    started: Option<Uuid>,
}

#[async_trait]
impl<'a> RecoveryHandler for StartRetry<'a> {
    async fn apply(
        &mut self,
        _decision: &RecoveryDecision,
        failure: &FailureSignal,
    ) -> RecoveryAttemptResult {
        match self.sessions.start() {
            Ok(id) => {
                self.started = Some(id);
                RecoveryAttemptResult::recovered()
            }
            Err(e) => RecoveryAttemptResult::still_failing(FailureSignal::new(
                failure.condition,
                e.to_string(),
            )),
        }
    }
}

/// Used where the policy escalates before any handler runs.
struct Unrecoverable;

#[async_trait]
impl RecoveryHandler for Unrecoverable {
    async fn apply(
        &mut self,
        _decision: &RecoveryDecision,
        failure: &FailureSignal,
    ) -> RecoveryAttemptResult {
        RecoveryAttemptResult::still_failing(failure.clone())
    }
}

/// Re-invokes late agents, then the dependents that never got to run.
struct TimeoutRecovery<'a> {
    orchestrator: &'a Orchestrator,
    graph: &'a AgentGraph,
    producers: &'a ProducerMap,
    run: &'a mut CoordinatorRun,
    scope: &'a RunScope,
}

#[async_trait]
impl<'a> RecoveryHandler for TimeoutRecovery<'a> {
    async fn apply(
        &mut self,
        decision: &RecoveryDecision,
        failure: &FailureSignal,
    ) -> RecoveryAttemptResult {
        let mut late = Vec::new();
        let mut recovered = BTreeSet::new();

        for agent in &decision.agents {
            let result = self
                .orchestrator
                .reinvoke(
                    self.graph,
                    self.producers,
                    &mut *self.run,
                    agent,
                    Vec::new(),
                    decision.attempt,
                    self.scope,
                )
                .await;
            match result {
                Ok(None) => {
                    recovered.insert(agent.clone());
                }
                Ok(Some(AgentFailure::Timeout { agent, .. })) => late.push(agent),
                Ok(Some(_)) => {}
                Err(e) => {
                    return RecoveryAttemptResult::still_failing(
                        FailureSignal::new(failure.condition, e.to_string())
                            .with_agents(decision.agents.clone()),
                    )
                }
            }
        }

        let dependents: BTreeSet<AgentId> = recovered
            .iter()
            .flat_map(|agent| self.graph.transitive_dependents(agent))
            .collect();
        for agent in self
            .graph
            .order()
            .into_iter()
            .filter(|a| dependents.contains(a))
        {
            let result = self
                .orchestrator
                .reinvoke(
                    self.graph,
                    self.producers,
                    &mut *self.run,
                    &agent,
                    Vec::new(),
                    0,
                    self.scope,
                )
                .await;
            match result {
                Ok(Some(AgentFailure::Timeout { agent, .. })) => late.push(agent),
                Ok(_) => {}
                Err(e) => {
                    return RecoveryAttemptResult::still_failing(FailureSignal::new(
                        failure.condition,
                        e.to_string(),
                    ))
                }
            }
        }

        if late.is_empty() {
            RecoveryAttemptResult::recovered()
        } else {
            RecoveryAttemptResult::still_failing(
                FailureSignal::new(
                    FailureCondition::AgentTimeout,
                    format!("{} agent(s) still missed their deadline", late.len()),
                )
                .with_agents(late),
            )
        }
    }
}

/// Hands feedback to the agents behind a blocked reconciliation and
/// reconciles again. Resumes the session once the block clears.
struct ReinvestigationRecovery<'a> {
    orchestrator: &'a Orchestrator,
    session_id: Uuid,
    graph: &'a AgentGraph,
    producers: &'a ProducerMap,
    run: &'a mut CoordinatorRun,
    latest: &'a mut ReconciliationResult,
    scope: &'a RunScope,
}

#[async_trait]
impl<'a> RecoveryHandler for ReinvestigationRecovery<'a> {
    async fn apply(
        &mut self,
        decision: &RecoveryDecision,
        _failure: &FailureSignal,
    ) -> RecoveryAttemptResult {
        let targets = self.latest.reinvestigation_targets();
        let mut unanswered = Vec::new();
        for (agent, feedback) in targets {
            let result = self
                .orchestrator
                .reinvoke(
                    self.graph,
                    self.producers,
                    &mut *self.run,
                    &agent,
                    feedback,
                    decision.attempt,
                    self.scope,
                )
                .await;
            match result {
                Ok(None) => {}
                Ok(Some(failure)) => {
                    warn!(
                        event = "pipeline.reinvestigation_unanswered",
                        agent = %agent,
                        attempt = decision.attempt,
                        failure = ?failure
                    );
                    unanswered.push(agent);
                }
                Err(e) => {
                    return RecoveryAttemptResult::still_failing(
                        FailureSignal::new(FailureCondition::Blocked, e.to_string())
                            .with_agents([agent]),
                    )
                }
            }
        }

        // The conflict stands until every contested agent answers; the
        // previous outputs are still in place.
        if !unanswered.is_empty() {
            return RecoveryAttemptResult::still_failing(
                FailureSignal::new(
                    FailureCondition::Blocked,
                    format!(
                        "{} agent(s) failed to answer reinvestigation",
                        unanswered.len()
                    ),
                )
                .with_agents(unanswered),
            );
        }

        let result = match self.orchestrator.reconcile(&*self.run, self.session_id) {
            Ok(result) => result,
            Err(e) => {
                return RecoveryAttemptResult::still_failing(FailureSignal::new(
                    FailureCondition::Blocked,
                    e.to_string(),
                ))
            }
        };
        *self.latest = result;

        if self.latest.is_blocked() {
            return RecoveryAttemptResult::still_failing(
                FailureSignal::new(
                    FailureCondition::Blocked,
                    self.latest.to_error().to_string(),
                )
                .with_agents(self.latest.reinvestigation_targets().into_keys()),
            );
        }
        match self.orchestrator.sessions.resume() {
            Ok(()) => RecoveryAttemptResult::recovered(),
            Err(e) => RecoveryAttemptResult::still_failing(FailureSignal::new(
                FailureCondition::Blocked,
                e.to_string(),
            )),
        }
    }
}
