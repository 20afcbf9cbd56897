//! Evidence Validator: accept, correct, or flag a single claim.
//!
//! Scoring is `reliability_weight × structural_similarity`. Candidates are
//! compared with a total order (score, then authority, then evidence id), so
//! the scan order, including any order suggested by the learning observer,
//! cannot change the verdict.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Claim, Evidence, EvidenceId, EvidencePool, SourceKind};
use crate::evidence::similarity::{shape_compatibility, structural_similarity};
use crate::learning::{AdviceContext, LearningObserver};

/// Configurable decision thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceThresholds {
    pub accept_threshold: f64,
    pub alternative_threshold: f64,
    /// Lowest source kind allowed to accept a claim outright.
    pub min_authority: SourceKind,
}

impl Default for EvidenceThresholds {
    fn default() -> Self {
        Self {
            accept_threshold: 0.8,
            alternative_threshold: 0.5,
            min_authority: SourceKind::PrimaryImplementation,
        }
    }
}

/// Outcome of validating one claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum EvidenceVerdict {
    Accepted {
        evidence: EvidenceId,
        source_kind: SourceKind,
        score: f64,
    },
    /// The claim is wrong, but the pool proves a different value.
    RejectedWithAlternative {
        alternative: Value,
        evidence: EvidenceId,
        source_kind: SourceKind,
        score: f64,
    },
    /// Nothing in the pool is strong enough either way.
    InsufficientEvidence { best_score: f64 },
}

impl EvidenceVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, EvidenceVerdict::Accepted { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceVerdict::Accepted { .. } => "accepted",
            EvidenceVerdict::RejectedWithAlternative { .. } => "rejected_with_alternative",
            EvidenceVerdict::InsufficientEvidence { .. } => "insufficient_evidence",
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            EvidenceVerdict::Accepted { score, .. }
            | EvidenceVerdict::RejectedWithAlternative { score, .. } => *score,
            EvidenceVerdict::InsufficientEvidence { best_score } => *best_score,
        }
    }

    pub fn evidence(&self) -> Option<&EvidenceId> {
        match self {
            EvidenceVerdict::Accepted { evidence, .. }
            | EvidenceVerdict::RejectedWithAlternative { evidence, .. } => Some(evidence),
            EvidenceVerdict::InsufficientEvidence { .. } => None,
        }
    }

    /// The claim an agent may publish under this verdict, if any.
    pub fn published_claim(&self, emitted: &Claim) -> Option<Claim> {
        match self {
            EvidenceVerdict::Accepted { .. } => Some(emitted.clone()),
            EvidenceVerdict::RejectedWithAlternative {
                alternative,
                evidence,
                score,
                ..
            } => Some(Claim {
                subject: emitted.subject.clone(),
                asserted_value: alternative.clone(),
                supporting_evidence: vec![evidence.clone()],
                confidence: score.clamp(0.0, 1.0),
            }),
            EvidenceVerdict::InsufficientEvidence { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate<'a> {
    evidence: &'a Evidence,
    value: &'a Value,
    score: f64,
}

impl Candidate<'_> {
    /// Total order: higher score, then higher authority, then lower id.
    fn rank(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then(self.evidence.source_kind.cmp(&other.evidence.source_kind))
            .then(other.evidence.id.cmp(&self.evidence.id))
    }
}

fn best<'a, I>(candidates: I) -> Option<Candidate<'a>>
where
    I: IntoIterator<Item = Candidate<'a>>,
{
    candidates.into_iter().fold(None, |best, c| match best {
        Some(b) if b.rank(&c) != Ordering::Less => Some(b),
        _ => Some(c),
    })
}

/// Stateless validator; holds only its thresholds.
#[derive(Debug, Clone, Default)]
pub struct EvidenceValidator {
    thresholds: EvidenceThresholds,
}

impl EvidenceValidator {
    pub fn new(thresholds: EvidenceThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &EvidenceThresholds {
        &self.thresholds
    }

    /// Decide `claim` against `pool`.
    pub fn validate(
        &self,
        claim: &Claim,
        pool: &EvidencePool,
        learning: &dyn LearningObserver,
    ) -> EvidenceVerdict {
        let mut scan: Vec<(&Evidence, &Value)> = pool.about(&claim.subject).collect();

        // Try the historically decisive record first. Only affects scan order.
        if let Some(preferred) = learning
            .advise(&AdviceContext::evidence_search(&claim.subject))
            .and_then(|insight| insight.preferred_evidence)
        {
            if let Some(pos) = scan.iter().position(|(e, _)| e.id == preferred) {
                let hit = scan.remove(pos);
                scan.insert(0, hit);
            }
        }

        let supporting = best(
            scan.iter()
                .filter(|(e, _)| e.source_kind >= self.thresholds.min_authority)
                .map(|(e, v)| Candidate {
                    evidence: *e,
                    value: *v,
                    score: e.reliability_weight() * structural_similarity(&claim.asserted_value, v),
                }),
        );
        if let Some(c) = &supporting {
            if c.score >= self.thresholds.accept_threshold {
                return EvidenceVerdict::Accepted {
                    evidence: c.evidence.id.clone(),
                    source_kind: c.evidence.source_kind,
                    score: c.score,
                };
            }
        }

        let alternative = best(scan.iter().map(|(e, v)| Candidate {
            evidence: *e,
            value: *v,
            score: e.reliability_weight() * shape_compatibility(&claim.asserted_value, v),
        }));
        if let Some(c) = alternative {
            if c.score >= self.thresholds.alternative_threshold {
                return EvidenceVerdict::RejectedWithAlternative {
                    alternative: c.value.clone(),
                    evidence: c.evidence.id.clone(),
                    source_kind: c.evidence.source_kind,
                    score: c.score,
                };
            }
        }

        EvidenceVerdict::InsufficientEvidence {
            best_score: supporting.map(|c| c.score).unwrap_or(0.0),
        }
    }

    /// Highest source kind among records that agree with `claim`.
    ///
    /// Agreement means structural similarity at or above the accept threshold,
    /// independent of reliability weight, so every kind can rank.
    pub fn supporting_authority(&self, claim: &Claim, pool: &EvidencePool) -> Option<SourceKind> {
        pool.about(&claim.subject)
            .filter(|(_, v)| {
                structural_similarity(&claim.asserted_value, v) >= self.thresholds.accept_threshold
            })
            .map(|(e, _)| e.source_kind)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ValidationEvent;
    use crate::learning::{Insight, LearningStatus, NoopLearning};
    use serde_json::json;

    struct Suggests(&'static str);

    impl LearningObserver for Suggests {
        fn observe(&self, _event: &ValidationEvent) {}
        fn advise(&self, context: &AdviceContext) -> Option<Insight> {
            Some(Insight {
                subject: context.subject.clone(),
                preferred_evidence: Some(EvidenceId::new(self.0)),
                contention: 0,
                confidence: 1.0,
            })
        }
        fn status(&self) -> LearningStatus {
            LearningStatus::default()
        }
    }

    fn pool() -> EvidencePool {
        EvidencePool::new()
            .with(Evidence::new("src-1", SourceKind::PrimaryImplementation, "field-X", json!("A")))
            .with(Evidence::new("env-1", SourceKind::EnvironmentObservation, "field-X", json!("A")))
            .with(Evidence::new("doc-1", SourceKind::SecondaryDocumentation, "field-X", json!("B")))
            .with(Evidence::new("env-2", SourceKind::EnvironmentObservation, "port", json!(5433)))
            .with(Evidence::new("doc-2", SourceKind::SecondaryDocumentation, "region", json!("eu")))
    }

    #[test]
    fn test_primary_match_is_accepted() {
        let v = EvidenceValidator::default();
        let verdict = v.validate(&Claim::new("field-X", json!("a")), &pool(), &NoopLearning);
        assert!(matches!(
            verdict,
            EvidenceVerdict::Accepted { ref evidence, source_kind: SourceKind::PrimaryImplementation, .. }
                if evidence.as_str() == "src-1"
        ));
    }

    #[test]
    fn test_wrong_value_is_corrected_from_pool() {
        let v = EvidenceValidator::default();
        let verdict = v.validate(&Claim::new("field-X", json!("B")), &pool(), &NoopLearning);
        match verdict {
            EvidenceVerdict::RejectedWithAlternative { alternative, evidence, .. } => {
                assert_eq!(alternative, json!("A"));
                assert_eq!(evidence.as_str(), "src-1");
            }
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[test]
    fn test_environment_can_supply_alternative_but_not_accept() {
        let v = EvidenceValidator::default();
        let verdict = v.validate(&Claim::new("port", json!(5433)), &pool(), &NoopLearning);
        assert!(matches!(verdict, EvidenceVerdict::RejectedWithAlternative { score, .. } if (score - 0.75).abs() < 1e-9));
    }

    #[test]
    fn test_documentation_alone_is_insufficient() {
        let v = EvidenceValidator::default();
        let verdict = v.validate(&Claim::new("region", json!("us")), &pool(), &NoopLearning);
        assert!(matches!(verdict, EvidenceVerdict::InsufficientEvidence { .. }));
        let verdict = v.validate(&Claim::new("unknown", json!(1)), &pool(), &NoopLearning);
        assert_eq!(verdict, EvidenceVerdict::InsufficientEvidence { best_score: 0.0 });
    }

    #[test]
    fn test_advice_never_changes_verdict() {
        let v = EvidenceValidator::default();
        let claim = Claim::new("field-X", json!("B"));
        let baseline = v.validate(&claim, &pool(), &NoopLearning);
        for preferred in ["doc-1", "env-1", "src-1", "missing"] {
            assert_eq!(v.validate(&claim, &pool(), &Suggests(preferred)), baseline);
        }
    }

    #[test]
    fn test_supporting_authority_ranks_every_kind() {
        let v = EvidenceValidator::default();
        let p = pool();
        assert_eq!(
            v.supporting_authority(&Claim::new("field-X", json!("A")), &p),
            Some(SourceKind::PrimaryImplementation)
        );
        assert_eq!(
            v.supporting_authority(&Claim::new("field-X", json!("B")), &p),
            Some(SourceKind::SecondaryDocumentation)
        );
        assert_eq!(v.supporting_authority(&Claim::new("field-X", json!("C")), &p), None);
    }

    #[test]
    fn test_published_claim_carries_correction() {
        let emitted = Claim::new("field-X", json!("B")).citing("doc-1");
        let verdict = EvidenceValidator::default().validate(&emitted, &pool(), &NoopLearning);
        let published = verdict.published_claim(&emitted).unwrap();
        assert_eq!(published.asserted_value, json!("A"));
        assert_eq!(published.supporting_evidence, vec![EvidenceId::new("src-1")]);
    }
}
