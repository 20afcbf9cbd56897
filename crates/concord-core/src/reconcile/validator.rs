//! Cross-Agent Validator: pairwise conflict detection and authority-ordered
//! resolution over every published agent output.
//!
//! Claims are compared as the agents emitted them, each carrying its evidence
//! verdict. The canonical view holds, per subject, the winning claim in its
//! canonical form (accepted as-is, or the evidence-backed correction).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::digest::values_equivalent;
use crate::domain::{
    AgentId, AgentOutput, BlockReason, Claim, ConcordError, EvidencePool, Result, SourceKind,
};
use crate::evidence::{fits_shape, EvidenceValidator};
use crate::learning::{AdviceContext, LearningObserver};
use crate::reconcile::conflict::{
    authority_label, AttributedClaim, Conflict, ConflictKind, Resolution, ResolutionStrategy,
};

/// Quality gate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Minimum fraction of emitted claims that must reach `Accepted`.
    pub min_accepted_fraction: f64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            min_accepted_fraction: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    Resolved,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub status: ReconcileStatus,
    /// One canonical claim per settled subject.
    pub canonical: BTreeMap<String, Claim>,
    /// The attributed claim that won each settled subject.
    pub chosen: BTreeMap<String, AttributedClaim>,
    /// Ordered by subject, then agent pair.
    pub conflicts: Vec<Conflict>,
    pub resolutions: Vec<Resolution>,
    /// Claims whose evidence verdict was not `Accepted`.
    pub unaccepted: Vec<AttributedClaim>,
    pub emitted: usize,
    pub accepted: usize,
    pub accepted_fraction: f64,
    pub block_reasons: Vec<BlockReason>,
}

impl ReconciliationResult {
    pub fn is_blocked(&self) -> bool {
        self.status == ReconcileStatus::Blocked
    }

    pub fn halted(&self) -> impl Iterator<Item = &Resolution> + '_ {
        self.resolutions.iter().filter(|r| r.is_halt())
    }

    pub fn to_error(&self) -> ConcordError {
        ConcordError::Blocked {
            reasons: self.block_reasons.clone(),
        }
    }

    /// Agents that must re-investigate, each with the feedback to hand them.
    pub fn reinvestigation_targets(&self) -> BTreeMap<AgentId, Vec<String>> {
        let mut targets: BTreeMap<AgentId, Vec<String>> = BTreeMap::new();
        for resolution in self.halted() {
            let (a, b) = (&resolution.conflict.claim_a, &resolution.conflict.claim_b);
            for (me, other) in [(a, b), (b, a)] {
                targets.entry(me.agent.clone()).or_default().push(format!(
                    "subject '{}': value {} ties with {} ({})",
                    resolution.conflict.subject,
                    me.claim.asserted_value,
                    other.agent,
                    authority_label(other.authority),
                ));
            }
        }
        let gate_failed = self
            .block_reasons
            .iter()
            .any(|r| matches!(r, BlockReason::QualityGate { .. }));
        if gate_failed {
            for claim in &self.unaccepted {
                targets.entry(claim.agent.clone()).or_default().push(format!(
                    "subject '{}': value {} was {}",
                    claim.claim.subject,
                    claim.claim.asserted_value,
                    claim.verdict.as_str(),
                ));
            }
        }
        targets
    }
}

/// Reconciles agent outputs against one evidence pool.
#[derive(Debug, Clone, Default)]
pub struct CrossAgentValidator {
    config: ReconcileConfig,
    evidence: EvidenceValidator,
}

impl CrossAgentValidator {
    pub fn new(config: ReconcileConfig, evidence: EvidenceValidator) -> Self {
        Self { config, evidence }
    }

    pub fn reconcile(
        &self,
        outputs: &[Arc<AgentOutput>],
        pool: &EvidencePool,
        learning: &dyn LearningObserver,
    ) -> Result<ReconciliationResult> {
        for output in outputs {
            output.verify()?;
        }

        let emitted: usize = outputs.iter().map(|o| o.verdicts.len()).sum();
        let accepted: usize = outputs.iter().map(|o| o.accepted_count()).sum();
        let accepted_fraction = if emitted == 0 {
            0.0
        } else {
            accepted as f64 / emitted as f64
        };

        let by_subject = self.attribute(outputs, pool);
        let unaccepted: Vec<AttributedClaim> = by_subject
            .values()
            .flatten()
            .filter(|c| !c.verdict.is_accepted())
            .cloned()
            .collect();

        // Most contended subjects first; the output is re-sorted below.
        let mut order: Vec<(&String, u32)> = by_subject
            .keys()
            .map(|subject| {
                let contention = learning
                    .advise(&AdviceContext::conflict_ordering(subject.as_str()))
                    .map(|i| i.contention)
                    .unwrap_or(0);
                (subject, contention)
            })
            .collect();
        order.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

        let mut chosen = BTreeMap::new();
        let mut conflicts = Vec::new();
        let mut resolutions = Vec::new();
        let mut tied_subjects = BTreeSet::new();

        for (subject, _) in order {
            let Some(group) = by_subject.get(subject) else {
                continue;
            };
            let winner = subject_winner(group);
            let top = group.iter().map(|c| c.authority).max().flatten();

            for (i, a) in group.iter().enumerate() {
                for b in &group[i + 1..] {
                    if values_equivalent(&a.claim.asserted_value, &b.claim.asserted_value) {
                        continue;
                    }
                    let conflict = Conflict {
                        subject: subject.clone(),
                        claim_a: a.clone(),
                        claim_b: b.clone(),
                        kind: classify(a, b, pool),
                    };
                    let resolution = resolve(conflict.clone(), top, winner.as_ref());
                    if resolution.is_halt() {
                        tied_subjects.insert(subject.clone());
                    }
                    conflicts.push(conflict);
                    resolutions.push(resolution);
                }
            }

            match winner {
                Some(w) => {
                    chosen.insert(subject.clone(), w);
                }
                None => {
                    tied_subjects.insert(subject.clone());
                }
            }
        }

        let pair_key = |s: &str, a: &AttributedClaim, b: &AttributedClaim| {
            (s.to_string(), a.agent.clone(), b.agent.clone())
        };
        conflicts.sort_by_key(|c| pair_key(&c.subject, &c.claim_a, &c.claim_b));
        resolutions.sort_by_key(|r| {
            pair_key(&r.conflict.subject, &r.conflict.claim_a, &r.conflict.claim_b)
        });

        let mut block_reasons: Vec<BlockReason> = tied_subjects
            .into_iter()
            .map(|subject| BlockReason::AuthorityTie { subject })
            .collect();
        if accepted_fraction < self.config.min_accepted_fraction {
            block_reasons.push(BlockReason::QualityGate {
                accepted_fraction,
                minimum: self.config.min_accepted_fraction,
            });
        }

        let canonical = chosen
            .iter()
            .filter_map(|(subject, c)| c.canonical().map(|claim| (subject.clone(), claim)))
            .collect();
        let status = if block_reasons.is_empty() {
            ReconcileStatus::Resolved
        } else {
            ReconcileStatus::Blocked
        };

        Ok(ReconciliationResult {
            status,
            canonical,
            chosen,
            conflicts,
            resolutions,
            unaccepted,
            emitted,
            accepted,
            accepted_fraction,
            block_reasons,
        })
    }

    /// One claim per agent per subject (highest confidence, later wins ties),
    /// grouped by subject and ordered by agent id.
    fn attribute(
        &self,
        outputs: &[Arc<AgentOutput>],
        pool: &EvidencePool,
    ) -> BTreeMap<String, Vec<AttributedClaim>> {
        let mut latest: BTreeMap<(String, AgentId), AttributedClaim> = BTreeMap::new();
        for output in outputs {
            for record in &output.verdicts {
                let key = (record.emitted.subject.clone(), output.agent_id.clone());
                let keep_existing = latest
                    .get(&key)
                    .is_some_and(|c| c.claim.confidence > record.emitted.confidence);
                if keep_existing {
                    continue;
                }
                latest.insert(
                    key,
                    AttributedClaim {
                        agent: output.agent_id.clone(),
                        claim: record.emitted.clone(),
                        verdict: record.verdict.clone(),
                        authority: self.evidence.supporting_authority(&record.emitted, pool),
                    },
                );
            }
        }

        let mut by_subject: BTreeMap<String, Vec<AttributedClaim>> = BTreeMap::new();
        for ((subject, _), claim) in latest {
            by_subject.entry(subject).or_default().push(claim);
        }
        by_subject
    }
}

/// The claim with the highest authority, provided every claim at that rank
/// agrees. Among agreeing claims: highest confidence, then lowest agent id.
fn subject_winner(group: &[AttributedClaim]) -> Option<AttributedClaim> {
    let top = group.iter().map(|c| c.authority).max()?;
    let leaders: Vec<&AttributedClaim> = group.iter().filter(|c| c.authority == top).collect();
    let first = leaders.first()?;
    let unanimous = leaders
        .iter()
        .all(|c| values_equivalent(&c.claim.asserted_value, &first.claim.asserted_value));
    if !unanimous {
        return None;
    }
    leaders
        .into_iter()
        .reduce(|best, c| {
            if c.claim.confidence > best.claim.confidence {
                c
            } else {
                best
            }
        })
        .cloned()
}

fn classify(a: &AttributedClaim, b: &AttributedClaim, pool: &EvidencePool) -> ConflictKind {
    if !a.claim.cites_evidence() || !b.claim.cites_evidence() {
        return ConflictKind::MissingSupport;
    }
    let shapes: Vec<&Value> = pool
        .about(&a.claim.subject)
        .filter(|(e, _)| e.source_kind == SourceKind::PrimaryImplementation)
        .map(|(_, v)| v)
        .collect();
    let fits = |c: &AttributedClaim| shapes.iter().any(|s| fits_shape(&c.claim.asserted_value, s));
    if !shapes.is_empty() && !(fits(a) && fits(b)) {
        return ConflictKind::SchemaMismatch;
    }
    ConflictKind::DirectContradiction
}

fn resolve(
    conflict: Conflict,
    top: Option<SourceKind>,
    winner: Option<&AttributedClaim>,
) -> Resolution {
    let (a, b) = (&conflict.claim_a, &conflict.claim_b);
    let (label_a, label_b) = (authority_label(a.authority), authority_label(b.authority));

    if a.authority != b.authority {
        let (won, lost, won_label, lost_label) = if a.authority > b.authority {
            (a, b, label_a, label_b)
        } else {
            (b, a, label_b, label_a)
        };
        let rationale = format!(
            "{} ({won_label}) outranks {} ({lost_label})",
            won.agent, lost.agent
        );
        let chosen = Some(won.clone());
        return Resolution {
            conflict,
            chosen,
            strategy: ResolutionStrategy::AuthorityOrder,
            rationale,
        };
    }

    match winner {
        Some(w) if top > a.authority => {
            let rationale = format!(
                "{} and {} tie at {label_a}; {} ({}) outranks both",
                a.agent,
                b.agent,
                w.agent,
                authority_label(w.authority)
            );
            Resolution {
                conflict,
                chosen: Some(w.clone()),
                strategy: ResolutionStrategy::Superseded,
                rationale,
            }
        }
        _ => {
            let rationale = format!("{} and {} tie at {label_a}", a.agent, b.agent);
            Resolution {
                conflict,
                chosen: None,
                strategy: ResolutionStrategy::Halt,
                rationale,
            }
        }
    }
}
