//! Run configuration.
//!
//! One explicit struct handed to the orchestrator at construction. Values may
//! come from defaults, a TOML document, or `CONCORD_*` environment variables;
//! the environment is read once by [`ConcordConfig::from_env`] and never
//! consulted again during a run.

use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinatorConfig;
use crate::domain::{ConcordError, Result};
use crate::evidence::EvidenceThresholds;
use crate::learning::{LearningConfig, LearningIntensity};
use crate::reconcile::ReconcileConfig;
use crate::recovery::RecoveryPolicy;

pub const ENV_LEARNING: &str = "CONCORD_LEARNING";
pub const ENV_LEARNING_INTENSITY: &str = "CONCORD_LEARNING_INTENSITY";
pub const ENV_ACCEPT_THRESHOLD: &str = "CONCORD_ACCEPT_THRESHOLD";
pub const ENV_ALTERNATIVE_THRESHOLD: &str = "CONCORD_ALTERNATIVE_THRESHOLD";
pub const ENV_MIN_ACCEPTED_FRACTION: &str = "CONCORD_MIN_ACCEPTED_FRACTION";
pub const ENV_MAX_RECOVERY_RETRIES: &str = "CONCORD_MAX_RECOVERY_RETRIES";
pub const ENV_AGENT_DEADLINE_MS: &str = "CONCORD_AGENT_DEADLINE_MS";
pub const ENV_MAX_CONCURRENT_AGENTS: &str = "CONCORD_MAX_CONCURRENT_AGENTS";

/// Full orchestrator configuration. `Default` is safe: learning disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcordConfig {
    pub evidence: EvidenceThresholds,
    pub reconcile: ReconcileConfig,
    pub coordinator: CoordinatorConfig,
    pub recovery: RecoveryPolicy,
    pub learning: LearningConfig,
    /// How many recent events the status query returns at most.
    pub status_history: usize,
}

impl Default for ConcordConfig {
    fn default() -> Self {
        Self {
            evidence: EvidenceThresholds::default(),
            reconcile: ReconcileConfig::default(),
            coordinator: CoordinatorConfig::default(),
            recovery: RecoveryPolicy::default(),
            learning: LearningConfig::default(),
            status_history: 50,
        }
    }
}

impl ConcordConfig {
    /// Parse a TOML document; missing sections fall back to defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| ConcordError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `CONCORD_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_LEARNING) {
            config.learning.enabled = parse_switch(ENV_LEARNING, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LEARNING_INTENSITY) {
            config.learning.intensity = match raw.trim().to_ascii_lowercase().as_str() {
                "passive" => LearningIntensity::Passive,
                "advisory" => LearningIntensity::Advisory,
                other => {
                    return Err(ConcordError::Config(format!(
                        "{ENV_LEARNING_INTENSITY}: unknown intensity '{other}'"
                    )))
                }
            };
        }
        if let Some(raw) = lookup(ENV_ACCEPT_THRESHOLD) {
            config.evidence.accept_threshold = parse_num(ENV_ACCEPT_THRESHOLD, &raw)?;
        }
        if let Some(raw) = lookup(ENV_ALTERNATIVE_THRESHOLD) {
            config.evidence.alternative_threshold = parse_num(ENV_ALTERNATIVE_THRESHOLD, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MIN_ACCEPTED_FRACTION) {
            config.reconcile.min_accepted_fraction = parse_num(ENV_MIN_ACCEPTED_FRACTION, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_RECOVERY_RETRIES) {
            config.recovery.max_attempts = parse_num(ENV_MAX_RECOVERY_RETRIES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_AGENT_DEADLINE_MS) {
            config.coordinator.agent_deadline_ms = parse_num(ENV_AGENT_DEADLINE_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_CONCURRENT_AGENTS) {
            config.coordinator.max_concurrent = parse_num(ENV_MAX_CONCURRENT_AGENTS, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConcordError::Config(format!("{name} must be within [0, 1], got {v}")))
            }
        };
        unit("accept_threshold", self.evidence.accept_threshold)?;
        unit("alternative_threshold", self.evidence.alternative_threshold)?;
        unit("min_accepted_fraction", self.reconcile.min_accepted_fraction)?;

        if self.evidence.alternative_threshold > self.evidence.accept_threshold {
            return Err(ConcordError::Config(
                "alternative_threshold must not exceed accept_threshold".to_string(),
            ));
        }
        if self.coordinator.max_concurrent == 0 {
            return Err(ConcordError::Config("max_concurrent must be at least 1".into()));
        }
        if self.coordinator.agent_deadline_ms == 0 {
            return Err(ConcordError::Config("agent_deadline_ms must be positive".into()));
        }
        if self.learning.queue_capacity == 0 || self.learning.workers == 0 {
            return Err(ConcordError::Config(
                "learning queue_capacity and workers must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn parse_switch(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Ok(true),
        "0" | "off" | "false" | "no" => Ok(false),
        other => Err(ConcordError::Config(format!("{key}: expected on/off, got '{other}'"))),
    }
}

fn parse_num<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ConcordError::Config(format!("{key}: {e}")))
}
