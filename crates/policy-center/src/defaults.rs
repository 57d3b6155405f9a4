use crate::model::{
    AdaptivePolicy, AuditPolicy, EnginePolicy, FactoryPolicy, MatchingPolicy, OptimizerPolicy,
    StatisticsPolicy, TolerancePolicy,
};

pub fn default_policy() -> EnginePolicy {
    EnginePolicy {
        matching: MatchingPolicy::default(),
        tolerance: TolerancePolicy::default(),
        statistics: StatisticsPolicy::default(),
        adaptive: AdaptivePolicy::default(),
        audit: AuditPolicy::default(),
        optimizer: OptimizerPolicy::default(),
        factory: FactoryPolicy::default(),
        provenance: Default::default(),
    }
}

impl Default for EnginePolicy {
    fn default() -> Self {
        default_policy()
    }
}

impl Default for MatchingPolicy {
    fn default() -> Self {
        Self {
            default_confidence_threshold: 0.7,
            default_matching_threshold: 0.6,
            max_results: 10,
            strict_validation: false,
        }
    }
}

impl Default for TolerancePolicy {
    fn default() -> Self {
        Self {
            position: 10.0,
            size: 0.1,
            text: 2,
            visual: 0.8,
            temporal_ms: 1_000,
        }
    }
}

impl Default for StatisticsPolicy {
    fn default() -> Self {
        Self {
            success_alpha: 0.1,
            failure_alpha: 0.2,
            failure_penalty: 0.1,
            max_failure_penalty: 0.5,
            initial_stability: 0.8,
            history_capacity: 256,
        }
    }
}

impl Default for AdaptivePolicy {
    fn default() -> Self {
        Self {
            stale_after_days: 30,
            high_success: 0.8,
            low_success: 0.5,
            reliable_locator: 0.7,
        }
    }
}

impl Default for AuditPolicy {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            retain: 5_000,
        }
    }
}

impl Default for OptimizerPolicy {
    fn default() -> Self {
        Self {
            reliable_locator: 0.6,
            reliable_primary_success: 0.7,
            baseline_success_rate: 0.6,
            low_reliability: 0.5,
            failure_limit: 3,
            min_samples_for_refinement: 3,
            refinement_weight: 0.2,
        }
    }
}

impl Default for FactoryPolicy {
    fn default() -> Self {
        Self {
            max_per_group: 5,
            min_interactions: 3,
            max_frequency_anchors: 10,
        }
    }
}
