//! Claims, evidence and the fixed source-kind authority hierarchy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a piece of evidence came from.
///
/// Variants are declared in ascending authority, so the derived `Ord` is the
/// authority order: `PrimaryImplementation > EnvironmentObservation >
/// SecondaryDocumentation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    SecondaryDocumentation,
    EnvironmentObservation,
    PrimaryImplementation,
}

impl SourceKind {
    /// Fixed reliability weight. Never learned, so the hierarchy stays deterministic.
    pub const fn reliability_weight(self) -> f64 {
        match self {
            SourceKind::PrimaryImplementation => 1.0,
            SourceKind::EnvironmentObservation => 0.75,
            SourceKind::SecondaryDocumentation => 0.45,
        }
    }

    pub fn all() -> [SourceKind; 3] {
        [
            SourceKind::PrimaryImplementation,
            SourceKind::EnvironmentObservation,
            SourceKind::SecondaryDocumentation,
        ]
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceKind::PrimaryImplementation => "primary_implementation",
            SourceKind::EnvironmentObservation => "environment_observation",
            SourceKind::SecondaryDocumentation => "secondary_documentation",
        };
        write!(f, "{s}")
    }
}

/// Stable identifier of an evidence record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceId(pub String);

impl EvidenceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EvidenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A normalized evidence record supplied by an ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: EvidenceId,
    pub source_kind: SourceKind,
    /// Subject this record primarily speaks about.
    pub subject: String,
    pub payload: Value,
}

impl Evidence {
    pub fn new(
        id: impl Into<String>,
        source_kind: SourceKind,
        subject: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: EvidenceId::new(id),
            source_kind,
            subject: subject.into(),
            payload,
        }
    }

    pub fn reliability_weight(&self) -> f64 {
        self.source_kind.reliability_weight()
    }

    /// The value this record asserts for `subject`, if it speaks about it.
    ///
    /// A record matches either by its own `subject`, or by carrying `subject`
    /// as a top-level key of an object payload.
    pub fn value_for(&self, subject: &str) -> Option<&Value> {
        if self.subject == subject {
            return Some(&self.payload);
        }
        self.payload.as_object().and_then(|map| map.get(subject))
    }
}

/// An asserted fact with supporting evidence references and a confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub subject: String,
    pub asserted_value: Value,
    pub supporting_evidence: Vec<EvidenceId>,
    /// Producer confidence, clamped to `[0, 1]`.
    pub confidence: f64,
}

impl Claim {
    pub fn new(subject: impl Into<String>, asserted_value: Value) -> Self {
        Self {
            subject: subject.into(),
            asserted_value,
            supporting_evidence: Vec::new(),
            confidence: 1.0,
        }
    }

    pub fn citing(mut self, evidence: impl Into<String>) -> Self {
        self.supporting_evidence.push(EvidenceId::new(evidence));
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn cites_evidence(&self) -> bool {
        !self.supporting_evidence.is_empty()
    }
}

/// Read-only pool of ingested evidence, keyed by id for deterministic iteration.
#[derive(Debug, Clone, Default)]
pub struct EvidencePool {
    records: BTreeMap<EvidenceId, Evidence>,
}

impl EvidencePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record. Re-ingesting an id replaces the earlier record.
    pub fn ingest(&mut self, evidence: Evidence) {
        self.records.insert(evidence.id.clone(), evidence);
    }

    pub fn with(mut self, evidence: Evidence) -> Self {
        self.ingest(evidence);
        self
    }

    pub fn get(&self, id: &EvidenceId) -> Option<&Evidence> {
        self.records.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Evidence> + '_ {
        self.records.values()
    }

    /// Records that assert some value for `subject`.
    pub fn about<'a>(&'a self, subject: &'a str) -> impl Iterator<Item = (&'a Evidence, &'a Value)> + 'a {
        self.records
            .values()
            .filter_map(move |e| e.value_for(subject).map(|v| (e, v)))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<Evidence> for EvidencePool {
    fn from_iter<I: IntoIterator<Item = Evidence>>(iter: I) -> Self {
        let mut pool = EvidencePool::new();
        for evidence in iter {
            pool.ingest(evidence);
        }
        pool
    }
}
