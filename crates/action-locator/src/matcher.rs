//! Matching engine: strategy-driven locator evaluation, validation and scoring

use std::fmt;
use std::sync::Arc;

use anchor_core_types::Element;
use anchor_policy::{AdaptivePolicy, EnginePolicy, MatchingPolicy};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::evaluate::{DefaultLocatorEvaluator, EvalContext, LocatorEvaluator};
use crate::scoring::{confidence, position_match, size_match};
use crate::stats::StatisticsTracker;
use crate::strategies::select_locators;
use crate::types::{Anchor, AnchorMatch, Locator, LocatorSlot, MatchStrategy};
use crate::validation::{CustomRule, Validator};

const STABLE_SCORE: f64 = 0.7;
const STABLE_SUCCESS_RATE: f64 = 0.6;
const ADAPTATION_FLOOR: f64 = 0.8;

/// Per-request matching options; unset fields fall back to engine policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchOptions {
    pub confidence_threshold: Option<f64>,
    pub strict_validation: Option<bool>,
    pub max_results: Option<usize>,
    /// When the candidate snapshot was captured. Snapshots older than an
    /// anchor's temporal tolerance never match it.
    #[serde(default)]
    pub snapshot_taken_at: Option<DateTime<Utc>>,
}

impl MatchOptions {
    pub fn strict() -> Self {
        Self {
            strict_validation: Some(true),
            ..Self::default()
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    pub fn with_snapshot_taken_at(mut self, taken_at: DateTime<Utc>) -> Self {
        self.snapshot_taken_at = Some(taken_at);
        self
    }
}

/// Evaluates anchors against element snapshots.
///
/// `evaluate` is a pure function of its inputs and may run concurrently for
/// any number of anchors; `match_anchor` additionally applies the outcome to
/// the anchor's statistics.
#[derive(Clone)]
pub struct MatchEngine {
    evaluator: Arc<dyn LocatorEvaluator>,
    validator: Validator,
    tracker: StatisticsTracker,
    matching: MatchingPolicy,
    adaptive: AdaptivePolicy,
}

impl fmt::Debug for MatchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchEngine")
            .field("validator", &self.validator)
            .field("matching", &self.matching)
            .field("adaptive", &self.adaptive)
            .finish()
    }
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::new(&EnginePolicy::default())
    }
}

impl MatchEngine {
    pub fn new(policy: &EnginePolicy) -> Self {
        Self {
            evaluator: Arc::new(DefaultLocatorEvaluator),
            validator: Validator::new(),
            tracker: StatisticsTracker::new(policy.statistics.clone()),
            matching: policy.matching.clone(),
            adaptive: policy.adaptive.clone(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn LocatorEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_custom_rule(mut self, name: impl Into<String>, rule: CustomRule) -> Self {
        self.validator.register(name, rule);
        self
    }

    pub fn tracker(&self) -> &StatisticsTracker {
        &self.tracker
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn max_results(&self, options: &MatchOptions) -> usize {
        options.max_results.unwrap_or(self.matching.max_results)
    }

    /// Minimum confidence a candidate needs to be accepted for `anchor`.
    pub fn threshold_for(&self, anchor: &Anchor, options: &MatchOptions) -> f64 {
        options
            .confidence_threshold
            .unwrap_or(anchor.confidence_threshold)
            .max(anchor.matching_threshold)
    }

    /// Evaluate and record the outcome on the anchor.
    pub fn match_anchor(
        &self,
        anchor: &mut Anchor,
        candidates: &[Element],
        options: &MatchOptions,
    ) -> Option<AnchorMatch> {
        let result = self.evaluate(anchor, candidates, options);
        let confidence = result.as_ref().map(|m| m.confidence).unwrap_or(0.0);
        self.tracker
            .record_outcome(anchor, result.is_some(), confidence);
        result
    }

    pub fn evaluate(
        &self,
        anchor: &Anchor,
        candidates: &[Element],
        options: &MatchOptions,
    ) -> Option<AnchorMatch> {
        self.evaluate_at(anchor, candidates, options, Utc::now())
    }

    pub fn evaluate_at(
        &self,
        anchor: &Anchor,
        candidates: &[Element],
        options: &MatchOptions,
        now: DateTime<Utc>,
    ) -> Option<AnchorMatch> {
        if candidates.is_empty() {
            debug!(anchor = %anchor.id, "empty candidate snapshot");
            return None;
        }
        if let Some(taken_at) = options.snapshot_taken_at {
            if is_stale(taken_at, now, anchor.tolerance.temporal_ms) {
                debug!(
                    anchor = %anchor.id,
                    taken_at = %taken_at,
                    temporal_ms = anchor.tolerance.temporal_ms,
                    "candidate snapshot is stale"
                );
                return None;
            }
        }

        let threshold = self.threshold_for(anchor, options);
        let strict = options
            .strict_validation
            .unwrap_or(self.matching.strict_validation);
        let ctx = EvalContext {
            tolerance: &anchor.tolerance,
            expected_bounds: anchor.expected_bounds.as_ref(),
        };

        let mut best: Option<AnchorMatch> = None;
        for (slot, locator) in select_locators(anchor, &self.adaptive, now) {
            let element = match self.evaluator.locate(locator, &ctx, candidates) {
                Ok(Some(element)) => element,
                Ok(None) => {
                    debug!(anchor = %anchor.id, locator = %locator.target, "locator found nothing");
                    continue;
                }
                Err(err) => {
                    debug!(anchor = %anchor.id, locator = %locator.target, error = %err, "locator evaluation fault");
                    continue;
                }
            };

            let verdict = self.validator.validate(&anchor.validation_rules, element, strict);
            if !verdict.accepted {
                continue;
            }

            let candidate = self.build_match(anchor, slot, locator, element, verdict.outcomes);
            match anchor.strategy {
                MatchStrategy::ParallelValidation => {
                    if best
                        .as_ref()
                        .map_or(true, |current| candidate.confidence > current.confidence)
                    {
                        best = Some(candidate);
                    }
                }
                MatchStrategy::CascadeFallback => {
                    return accept(anchor, candidate, threshold);
                }
                _ => {
                    if let Some(accepted) = accept(anchor, candidate, threshold) {
                        return Some(accepted);
                    }
                }
            }
        }

        best.and_then(|candidate| accept(anchor, candidate, threshold))
    }

    fn build_match(
        &self,
        anchor: &Anchor,
        slot: LocatorSlot,
        locator: &Locator,
        element: &Element,
        validation: Vec<crate::validation::RuleOutcome>,
    ) -> AnchorMatch {
        let expected = anchor.expected_bounds.as_ref();
        let position = position_match(expected, &element.bounds, anchor.tolerance.position);
        let size = size_match(expected, &element.bounds, anchor.tolerance.size);
        let breakdown = confidence(locator.reliability, position, size, anchor.stability_score);

        AnchorMatch {
            anchor_id: anchor.id.clone(),
            anchor_name: anchor.name.clone(),
            element: element.clone(),
            confidence: breakdown.confidence,
            locator: locator.clone(),
            locator_slot: slot,
            validation,
            position_match: position,
            size_match: size,
            is_stable: anchor.stability_score > STABLE_SCORE
                && anchor.success_rate > STABLE_SUCCESS_RATE,
            requires_adaptation: position < ADAPTATION_FLOOR || size < ADAPTATION_FLOOR,
        }
    }
}

fn is_stale(taken_at: DateTime<Utc>, now: DateTime<Utc>, window_ms: u64) -> bool {
    i64::try_from(window_ms)
        .ok()
        .and_then(Duration::try_milliseconds)
        .map_or(false, |window| now - taken_at > window)
}

fn accept(anchor: &Anchor, candidate: AnchorMatch, threshold: f64) -> Option<AnchorMatch> {
    if candidate.confidence >= threshold {
        debug!(
            anchor = %anchor.id,
            locator = %candidate.locator.target,
            confidence = candidate.confidence,
            "anchor matched"
        );
        if candidate.requires_adaptation {
            warn!(
                anchor = %anchor.id,
                position_match = candidate.position_match,
                size_match = candidate.size_match,
                "matched anchor drifted from expected geometry"
            );
        }
        Some(candidate)
    } else {
        debug!(
            anchor = %anchor.id,
            confidence = candidate.confidence,
            threshold,
            "candidate below confidence threshold"
        );
        None
    }
}
