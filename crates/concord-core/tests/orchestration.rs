//! End-to-end orchestration: DAG order, claim validation, reconciliation
//! and the recovery paths that end a run.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use concord_core::{
    AgentCoordinator, AgentDescriptor, AgentId, AgentInput, AgentProducer, AgentStatus, Claim,
    ConcordConfig, ConcordError, CoordinatorConfig, EventKind, EventLog, Evidence,
    EvidencePool, EvidenceValidator, EvidenceVerdict, FnProducer, NoopLearning, Orchestrator,
    ProducerMap, ProducerOutput, RecoveryAction, RecoveryOutcome, ResolutionStrategy, RunScope,
    SessionState, SourceKind, ToolCallCorrelator,
};
use serde_json::json;

fn field_pool() -> EvidencePool {
    EvidencePool::new()
        .with(Evidence::new("schema", SourceKind::PrimaryImplementation, "field_x", json!("u64")))
        .with(Evidence::new(
            "env-dump",
            SourceKind::EnvironmentObservation,
            "field_x",
            json!("string"),
        ))
        .with(Evidence::new("readme", SourceKind::SecondaryDocumentation, "field_x", json!("int")))
        .with(Evidence::new("cargo", SourceKind::PrimaryImplementation, "edition", json!("2021")))
}

fn emits(claims: Vec<Claim>) -> Arc<dyn AgentProducer> {
    FnProducer::shared(move |_input: AgentInput| {
        let claims = claims.clone();
        async move {
            Ok(claims
                .into_iter()
                .fold(ProducerOutput::new(), |out, claim| out.claim(claim)))
        }
    })
}

fn orchestrator(pool: EvidencePool) -> Orchestrator {
    Orchestrator::new(ConcordConfig::default(), pool, Arc::new(NoopLearning)).unwrap()
}

#[tokio::test]
async fn coordinator_visits_agents_in_topological_order() {
    let log = Arc::new(EventLog::new(Arc::new(NoopLearning)));
    let coordinator = AgentCoordinator::new(
        CoordinatorConfig::default(),
        EvidenceValidator::default(),
        Arc::new(EvidencePool::new()),
        log,
        Arc::new(ToolCallCorrelator::default()),
    );

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = |seen: Arc<Mutex<Vec<String>>>| -> Arc<dyn AgentProducer> {
        FnProducer::shared(move |input: AgentInput| {
            seen.lock().unwrap().push(input.agent_id.as_str().to_string());
            let key = input.agent_id.as_str().to_string();
            async move { Ok(ProducerOutput::new().context(key, json!(true))) }
        })
    };

    // Declared out of order on purpose.
    let agents = vec![
        AgentDescriptor::new("report").depends_on("lint").depends_on("build"),
        AgentDescriptor::new("lint").depends_on("fetch"),
        AgentDescriptor::new("build").depends_on("fetch"),
        AgentDescriptor::new("fetch"),
    ];
    let mut producers = ProducerMap::new();
    for id in ["fetch", "build", "lint", "report"] {
        producers.insert(AgentId::new(id), recorder(Arc::clone(&seen)));
    }

    let run = coordinator
        .run_all(&agents, &producers, &RunScope::detached())
        .await
        .unwrap();

    let order: Vec<&str> = run.visit_order.iter().map(|a| a.as_str()).collect();
    assert_eq!(order, vec!["fetch", "build", "lint", "report"]);

    let report = run.output(&AgentId::new("report")).unwrap();
    for upstream in ["fetch", "build", "lint"] {
        assert_eq!(report.inherited_context[upstream], json!(true));
    }
    assert_eq!(seen.lock().unwrap().last().map(String::as_str), Some("report"));
}

#[tokio::test]
async fn primary_source_outranks_environment_on_field_x() {
    let orch = orchestrator(field_pool());
    let agents = vec![AgentDescriptor::new("a"), AgentDescriptor::new("b")];
    let mut producers = ProducerMap::new();
    producers.insert(
        AgentId::new("a"),
        emits(vec![
            Claim::new("field_x", json!("u64")).citing("schema"),
            Claim::new("edition", json!("2021")).citing("cargo"),
        ]),
    );
    producers.insert(
        AgentId::new("b"),
        emits(vec![Claim::new("field_x", json!("string")).citing("env-dump")]),
    );

    let report = orch.run(&agents, &producers).await.unwrap();
    let result = &report.reconciliation;

    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.resolutions[0].strategy, ResolutionStrategy::AuthorityOrder);
    let chosen = result.resolutions[0].chosen.as_ref().unwrap();
    assert_eq!(chosen.agent, AgentId::new("a"));
    assert_eq!(chosen.authority, Some(SourceKind::PrimaryImplementation));
    assert_eq!(result.canonical["field_x"].asserted_value, json!("u64"));

    // B's claim was corrected, not silently dropped.
    let b = report.output("b").unwrap();
    assert!(matches!(
        b.verdicts[0].verdict,
        EvidenceVerdict::RejectedWithAlternative { .. }
    ));
    assert_eq!(
        orch.sessions().snapshot().unwrap().state,
        SessionState::Completed
    );
}

#[tokio::test]
async fn resolution_does_not_depend_on_declaration_order() {
    let claims_a = vec![Claim::new("field_x", json!("u64")).citing("schema")];
    let claims_b = vec![Claim::new("field_x", json!("string")).citing("env-dump")];
    let claims_c = vec![Claim::new("edition", json!("2021")).citing("cargo")];

    let mut producers = ProducerMap::new();
    producers.insert(AgentId::new("a"), emits(claims_a));
    producers.insert(AgentId::new("b"), emits(claims_b));
    producers.insert(AgentId::new("c"), emits(claims_c));

    let forward = vec![
        AgentDescriptor::new("a"),
        AgentDescriptor::new("b"),
        AgentDescriptor::new("c"),
    ];
    let mut reversed = forward.clone();
    reversed.reverse();

    let first = orchestrator(field_pool()).run(&forward, &producers).await.unwrap();
    let second = orchestrator(field_pool()).run(&reversed, &producers).await.unwrap();

    assert_eq!(first.reconciliation.canonical, second.reconciliation.canonical);
    assert_eq!(first.reconciliation.resolutions, second.reconciliation.resolutions);
    assert_eq!(first.reconciliation.conflicts, second.reconciliation.conflicts);
}

#[tokio::test]
async fn ungrounded_claim_is_flagged_for_reinvestigation() {
    let orch = orchestrator(field_pool());
    let agents = vec![AgentDescriptor::new("a")];
    let mut producers = ProducerMap::new();
    producers.insert(
        AgentId::new("a"),
        emits(vec![
            Claim::new("field_x", json!("u64")).citing("schema"),
            Claim::new("edition", json!("2021")).citing("cargo"),
            Claim::new("license", json!("MIT")),
        ]),
    );

    let report = orch.run(&agents, &producers).await.unwrap();
    let output = report.output("a").unwrap();

    assert_eq!(output.reinvestigation.len(), 1);
    assert_eq!(output.reinvestigation[0].subject, "license");
    assert!(matches!(
        output.verdicts[2].verdict,
        EvidenceVerdict::InsufficientEvidence { .. }
    ));
    assert!(!output.claims.iter().any(|c| c.subject == "license"));
    assert!(!report.reconciliation.canonical.contains_key("license"));
    assert_eq!(report.reconciliation.unaccepted.len(), 1);
}

#[tokio::test]
async fn unbreakable_tie_exhausts_recovery_and_fails_session() {
    let pool = EvidencePool::new()
        .with(Evidence::new("p1", SourceKind::PrimaryImplementation, "mode", json!("fast")))
        .with(Evidence::new("p2", SourceKind::PrimaryImplementation, "mode", json!("safe")));
    let orch = orchestrator(pool);

    let agents = vec![AgentDescriptor::new("a"), AgentDescriptor::new("b")];
    let mut producers = ProducerMap::new();
    producers.insert(
        AgentId::new("a"),
        emits(vec![Claim::new("mode", json!("fast")).citing("p1")]),
    );
    producers.insert(
        AgentId::new("b"),
        emits(vec![Claim::new("mode", json!("safe")).citing("p2")]),
    );

    let err = orch.run(&agents, &producers).await.unwrap_err();
    let ConcordError::Fatal(report) = err else {
        panic!("expected fatal error, got {err:?}");
    };

    assert_eq!(report.unresolved.len(), 1);
    assert_eq!(report.unresolved[0].subject, "mode");
    assert_eq!(report.recovery.len(), 1);
    let log = &report.recovery[0];
    assert_eq!(log.outcome, RecoveryOutcome::Failed);
    assert_eq!(log.attempts_used, 3);
    assert!(log
        .decisions
        .iter()
        .all(|d| d.action == RecoveryAction::Reinvestigate));
    assert!(report.events.iter().any(|e| e.kind == EventKind::SessionHalted));
    assert!(report.events.iter().any(|e| e.kind == EventKind::SessionFailed));
    assert_eq!(orch.sessions().snapshot().unwrap().state, SessionState::Failed);
}

/// "a" cites p1, "b" cites p2; both primary, so "mode" ties. `b` misbehaves
/// only once it is asked to re-investigate.
fn tie_with_flaky_reinvestigation(panics: bool) -> (Vec<AgentDescriptor>, ProducerMap) {
    let agents = vec![AgentDescriptor::new("a"), AgentDescriptor::new("b")];
    let mut producers = ProducerMap::new();
    producers.insert(
        AgentId::new("a"),
        emits(vec![Claim::new("mode", json!("fast")).citing("p1")]),
    );
    producers.insert(
        AgentId::new("b"),
        FnProducer::shared(move |input: AgentInput| async move {
            if !input.feedback.is_empty() {
                if panics {
                    panic!("b lost its place mid-reinvestigation");
                }
                anyhow::bail!("backend unavailable");
            }
            Ok(ProducerOutput::new().claim(Claim::new("mode", json!("safe")).citing("p2")))
        }),
    );
    (agents, producers)
}

fn tie_pool() -> EvidencePool {
    EvidencePool::new()
        .with(Evidence::new("p1", SourceKind::PrimaryImplementation, "mode", json!("fast")))
        .with(Evidence::new("p2", SourceKind::PrimaryImplementation, "mode", json!("safe")))
}

#[tokio::test]
async fn failed_reinvestigation_keeps_conflict_and_fails_run() {
    let orch = orchestrator(tie_pool());
    let (agents, producers) = tie_with_flaky_reinvestigation(false);

    let err = orch.run(&agents, &producers).await.unwrap_err();
    let ConcordError::Fatal(report) = err else {
        panic!("expected fatal error, got {err:?}");
    };

    // b's silence must not let a's value win by default.
    assert_eq!(report.unresolved.len(), 1);
    assert_eq!(report.unresolved[0].subject, "mode");
    let log = &report.recovery[0];
    assert_eq!(log.outcome, RecoveryOutcome::Failed);
    assert_eq!(log.attempts_used, 3);
    assert!(report.events.iter().any(|e| e.kind == EventKind::AgentDegraded));
    assert!(!report
        .events
        .iter()
        .any(|e| e.kind == EventKind::SessionResumed));
    assert_eq!(orch.sessions().snapshot().unwrap().state, SessionState::Failed);
}

#[tokio::test]
async fn panic_during_reinvestigation_is_contained() {
    let orch = orchestrator(tie_pool());
    let (agents, producers) = tie_with_flaky_reinvestigation(true);

    let err = orch.run(&agents, &producers).await.unwrap_err();
    let ConcordError::Fatal(report) = err else {
        panic!("expected fatal error, got {err:?}");
    };

    assert_eq!(report.unresolved[0].subject, "mode");
    assert_eq!(report.recovery[0].attempts_used, 3);
    let degraded = report
        .events
        .iter()
        .filter(|e| e.kind == EventKind::AgentDegraded)
        .count();
    assert_eq!(degraded, 3);
    assert_eq!(orch.sessions().snapshot().unwrap().state, SessionState::Failed);
}

#[tokio::test]
async fn failed_upstream_escalates_without_retry() {
    let orch = orchestrator(field_pool());
    let agents = vec![
        AgentDescriptor::new("scanner"),
        AgentDescriptor::new("summarize").depends_on("scanner"),
    ];
    let mut producers = ProducerMap::new();
    producers.insert(
        AgentId::new("scanner"),
        FnProducer::shared(|_input: AgentInput| async move {
            Err::<ProducerOutput, _>(anyhow::anyhow!("scanner crashed"))
        }),
    );
    producers.insert(AgentId::new("summarize"), emits(Vec::new()));

    let err = orch.run(&agents, &producers).await.unwrap_err();
    let ConcordError::Fatal(report) = err else {
        panic!("expected fatal error, got {err:?}");
    };

    let log = &report.recovery[0];
    assert_eq!(log.attempts_used, 1);
    assert_eq!(log.decisions[0].action, RecoveryAction::Escalate);
    assert!(report.summary.contains("summarize"));
    assert_eq!(orch.sessions().snapshot().unwrap().state, SessionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn late_agent_is_reinvoked_and_dependents_catch_up() {
    let mut config = ConcordConfig::default();
    config.coordinator.agent_deadline_ms = 100;
    let orch = Orchestrator::new(config, field_pool(), Arc::new(NoopLearning)).unwrap();

    let agents = vec![
        AgentDescriptor::new("slow"),
        AgentDescriptor::new("after").depends_on("slow"),
    ];
    let mut producers = ProducerMap::new();
    producers.insert(
        AgentId::new("slow"),
        FnProducer::shared(|input: AgentInput| async move {
            if input.attempt == 0 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(ProducerOutput::new()
                .claim(Claim::new("field_x", json!("u64")).citing("schema"))
                .context("slow_done", json!(true)))
        }),
    );
    producers.insert(
        AgentId::new("after"),
        FnProducer::shared(|input: AgentInput| async move {
            assert_eq!(input.context["slow_done"], json!(true));
            Ok(ProducerOutput::new().claim(Claim::new("edition", json!("2021")).citing("cargo")))
        }),
    );

    let report = orch.run(&agents, &producers).await.unwrap();

    assert_eq!(report.recovery.len(), 1);
    assert!(report.recovery[0].recovered());
    assert_eq!(report.recovery[0].decisions[0].action, RecoveryAction::ReinvokeAgent);
    assert_eq!(report.output("slow").unwrap().status, AgentStatus::Published);
    assert_eq!(report.output("slow").unwrap().attempt, 1);
    assert_eq!(report.output("after").unwrap().status, AgentStatus::Published);
    assert_eq!(report.reconciliation.canonical.len(), 2);
}

#[tokio::test]
async fn cycle_is_rejected_before_any_agent_runs() {
    let orch = orchestrator(field_pool());
    let agents = vec![
        AgentDescriptor::new("a").depends_on("b"),
        AgentDescriptor::new("b").depends_on("a"),
    ];
    let mut producers = ProducerMap::new();
    producers.insert(AgentId::new("a"), emits(Vec::new()));
    producers.insert(AgentId::new("b"), emits(Vec::new()));

    let err = orch.run(&agents, &producers).await.unwrap_err();
    assert!(matches!(err, ConcordError::DependencyCycle { .. }));
    assert!(orch.correlator().recent(10).is_empty());
    assert_eq!(orch.sessions().snapshot().unwrap().state, SessionState::Failed);
}
