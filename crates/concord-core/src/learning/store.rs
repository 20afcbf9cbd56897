//! Pattern derivation from validation events.
//!
//! Tallies per-subject outcomes (how often claims were accepted, corrected or
//! left unsupported, which evidence settled them, how often the subject was
//! contested) and turns a tally into an [`Insight`] once enough has been seen.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{EventKind, EvidenceId, ValidationEvent};
use crate::learning::error::{LearningError, LearningResult};
use crate::learning::observer::{AdviceContext, Insight};

/// Outcome tally for one subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub subject: String,
    pub accepted: u32,
    pub corrected: u32,
    pub insufficient: u32,
    pub conflicts: u32,
    pub halts: u32,
    pub evidence_hits: BTreeMap<EvidenceId, u32>,
}

impl Pattern {
    pub fn observations(&self) -> u32 {
        self.accepted + self.corrected + self.insufficient + self.conflicts
    }

    /// Share of validations that did not end in `Accepted` (0.0–1.0), NaN-safe.
    pub fn failure_rate(&self) -> f64 {
        let validated = self.accepted + self.corrected + self.insufficient;
        if validated == 0 {
            return 0.0;
        }
        f64::from(self.corrected + self.insufficient) / f64::from(validated)
    }

    /// Most frequently useful evidence; ties go to the smallest id.
    pub fn preferred_evidence(&self) -> Option<&EvidenceId> {
        self.evidence_hits
            .iter()
            .max_by(|(id_a, a), (id_b, b)| a.cmp(b).then_with(|| id_b.cmp(id_a)))
            .map(|(id, _)| id)
    }
}

/// Storage for derived patterns. Implementations are only ever touched by
/// learning workers and by `advise`, never by the validation path directly.
pub trait PatternStore: Send {
    fn record(&mut self, event: &ValidationEvent) -> LearningResult<()>;

    fn insight(&self, context: &AdviceContext) -> LearningResult<Option<Insight>>;

    fn patterns(&self) -> Vec<Pattern>;
}

/// Default in-process store.
#[derive(Debug, Clone)]
pub struct InMemoryPatternStore {
    min_observations: u32,
    patterns: BTreeMap<String, Pattern>,
}

impl InMemoryPatternStore {
    pub fn new(min_observations: u32) -> Self {
        Self {
            min_observations,
            patterns: BTreeMap::new(),
        }
    }

    fn pattern_mut(&mut self, subject: &str) -> &mut Pattern {
        self.patterns
            .entry(subject.to_string())
            .or_insert_with(|| Pattern {
                subject: subject.to_string(),
                ..Pattern::default()
            })
    }
}

impl Default for InMemoryPatternStore {
    fn default() -> Self {
        Self::new(3)
    }
}

fn required<'a>(event: &'a ValidationEvent, field: &str) -> LearningResult<&'a str> {
    event
        .context_str(field)
        .ok_or_else(|| LearningError::MalformedEvent {
            kind: event.kind.to_string(),
            field: field.to_string(),
        })
}

impl PatternStore for InMemoryPatternStore {
    fn record(&mut self, event: &ValidationEvent) -> LearningResult<()> {
        match event.kind {
            EventKind::ClaimValidated => {
                let subject = required(event, "subject")?;
                let verdict = required(event, "verdict")?;
                let evidence = event.context_str("evidence").map(EvidenceId::new);
                let pattern = self.pattern_mut(subject);
                match verdict {
                    "accepted" => pattern.accepted += 1,
                    "rejected_with_alternative" => pattern.corrected += 1,
                    "insufficient_evidence" => pattern.insufficient += 1,
                    other => {
                        return Err(LearningError::Store(format!("unknown verdict '{other}'")))
                    }
                }
                if let Some(id) = evidence {
                    *pattern.evidence_hits.entry(id).or_insert(0) += 1;
                }
            }
            EventKind::ConflictResolved => {
                let subject = required(event, "subject")?;
                let strategy = required(event, "strategy")?;
                let halted = strategy == "halt";
                let pattern = self.pattern_mut(subject);
                pattern.conflicts += 1;
                if halted {
                    pattern.halts += 1;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn insight(&self, context: &AdviceContext) -> LearningResult<Option<Insight>> {
        let Some(pattern) = self.patterns.get(&context.subject) else {
            return Ok(None);
        };
        let n = pattern.observations();
        if n < self.min_observations {
            return Ok(None);
        }
        Ok(Some(Insight {
            subject: pattern.subject.clone(),
            preferred_evidence: pattern.preferred_evidence().cloned(),
            contention: pattern.conflicts,
            confidence: f64::from(n) / f64::from(n + 4),
        }))
    }

    fn patterns(&self) -> Vec<Pattern> {
        self.patterns.values().cloned().collect()
    }
}
