use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::PolicyError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnginePolicy {
    pub matching: MatchingPolicy,
    pub tolerance: TolerancePolicy,
    pub statistics: StatisticsPolicy,
    pub adaptive: AdaptivePolicy,
    pub audit: AuditPolicy,
    pub optimizer: OptimizerPolicy,
    pub factory: FactoryPolicy,
    #[serde(skip)]
    pub provenance: HashMap<String, PolicyProvenance>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatchingPolicy {
    pub default_confidence_threshold: f64,
    pub default_matching_threshold: f64,
    pub max_results: usize,
    pub strict_validation: bool,
}

/// Tolerances applied to anchors created without explicit values.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TolerancePolicy {
    pub position: f64,
    pub size: f64,
    pub text: u32,
    pub visual: f64,
    pub temporal_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatisticsPolicy {
    pub success_alpha: f64,
    pub failure_alpha: f64,
    pub failure_penalty: f64,
    pub max_failure_penalty: f64,
    pub initial_stability: f64,
    pub history_capacity: usize,
}

/// Upper bound for `adaptive.stale_after_days` (about a century).
pub const MAX_STALE_AFTER_DAYS: i64 = 36_500;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdaptivePolicy {
    pub stale_after_days: i64,
    pub high_success: f64,
    pub low_success: f64,
    pub reliable_locator: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditPolicy {
    pub capacity: usize,
    pub retain: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimizerPolicy {
    pub reliable_locator: f64,
    pub reliable_primary_success: f64,
    pub baseline_success_rate: f64,
    pub low_reliability: f64,
    pub failure_limit: u64,
    pub min_samples_for_refinement: usize,
    pub refinement_weight: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FactoryPolicy {
    pub max_per_group: usize,
    pub min_interactions: usize,
    pub max_frequency_anchors: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PolicyProvenance {
    pub path: String,
    pub source: PolicySource,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PolicySource {
    Builtin,
    File,
    Env,
}

impl EnginePolicy {
    pub fn set_provenance(&mut self, path: &str, source: PolicySource) {
        self.provenance.insert(
            path.to_string(),
            PolicyProvenance {
                path: path.to_string(),
                source,
            },
        );
    }

    pub fn source_of(&self, path: &str) -> Option<PolicySource> {
        self.provenance.get(path).map(|p| p.source)
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let probabilities = [
            ("matching.default_confidence_threshold", self.matching.default_confidence_threshold),
            ("matching.default_matching_threshold", self.matching.default_matching_threshold),
            ("tolerance.size", self.tolerance.size),
            ("tolerance.visual", self.tolerance.visual),
            ("statistics.success_alpha", self.statistics.success_alpha),
            ("statistics.failure_alpha", self.statistics.failure_alpha),
            ("statistics.failure_penalty", self.statistics.failure_penalty),
            ("statistics.max_failure_penalty", self.statistics.max_failure_penalty),
            ("statistics.initial_stability", self.statistics.initial_stability),
            ("adaptive.high_success", self.adaptive.high_success),
            ("adaptive.low_success", self.adaptive.low_success),
            ("adaptive.reliable_locator", self.adaptive.reliable_locator),
            ("optimizer.reliable_locator", self.optimizer.reliable_locator),
            ("optimizer.reliable_primary_success", self.optimizer.reliable_primary_success),
            ("optimizer.baseline_success_rate", self.optimizer.baseline_success_rate),
            ("optimizer.low_reliability", self.optimizer.low_reliability),
            ("optimizer.refinement_weight", self.optimizer.refinement_weight),
        ];
        for (path, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(PolicyError::Invalid(format!(
                    "{path} must lie in [0,1], got {value}"
                )));
            }
        }
        if !self.tolerance.position.is_finite() || self.tolerance.position < 0.0 {
            return Err(PolicyError::Invalid(
                "tolerance.position must be a non-negative number".into(),
            ));
        }
        if !(1..=MAX_STALE_AFTER_DAYS).contains(&self.adaptive.stale_after_days) {
            return Err(PolicyError::Invalid(format!(
                "adaptive.stale_after_days must lie in [1,{MAX_STALE_AFTER_DAYS}], got {}",
                self.adaptive.stale_after_days
            )));
        }
        if self.adaptive.low_success > self.adaptive.high_success {
            return Err(PolicyError::Invalid(
                "adaptive.low_success must not exceed adaptive.high_success".into(),
            ));
        }
        if self.audit.capacity == 0 || self.audit.retain == 0 {
            return Err(PolicyError::Invalid("audit capacities must be > 0".into()));
        }
        if self.audit.retain > self.audit.capacity {
            return Err(PolicyError::Invalid(
                "audit.retain must not exceed audit.capacity".into(),
            ));
        }
        if self.statistics.history_capacity == 0 {
            return Err(PolicyError::Invalid(
                "statistics.history_capacity must be > 0".into(),
            ));
        }
        if self.matching.max_results == 0 {
            return Err(PolicyError::Invalid("matching.max_results must be > 0".into()));
        }
        Ok(())
    }
}
