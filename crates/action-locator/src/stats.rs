//! Statistics tracking for anchors
//!
//! `record_outcome` is the only writer of an anchor's quality fields. It is
//! order-sensitive (the moving average does not commute), so callers must
//! hold the anchor's exclusive lock while applying it.

use std::collections::VecDeque;

use anchor_policy::StatisticsPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Anchor, LocatorTarget};

/// One recorded match attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSample {
    pub at: DateTime<Utc>,
    pub success: bool,
    pub confidence: f64,
    /// Locator that produced the accepted match
    pub locator: Option<LocatorTarget>,
}

/// Bounded per-anchor ring of recent outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeHistory {
    capacity: usize,
    samples: VecDeque<OutcomeSample>,
}

impl OutcomeHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::new(),
        }
    }

    pub fn push(&mut self, sample: OutcomeSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn samples(&self) -> impl Iterator<Item = &OutcomeSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Successful samples produced by `target`.
    pub fn wins_for<'a>(
        &'a self,
        target: &'a LocatorTarget,
    ) -> impl Iterator<Item = &'a OutcomeSample> + 'a {
        self.samples
            .iter()
            .filter(move |s| s.success && s.locator.as_ref() == Some(target))
    }
}

/// Applies match outcomes to anchor statistics.
#[derive(Debug, Clone, Default)]
pub struct StatisticsTracker {
    policy: StatisticsPolicy,
}

impl StatisticsTracker {
    pub fn new(policy: StatisticsPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &StatisticsPolicy {
        &self.policy
    }

    pub fn record_outcome(&self, anchor: &mut Anchor, success: bool, confidence: f64) {
        self.record_outcome_at(anchor, success, confidence, Utc::now());
    }

    pub fn record_outcome_at(
        &self,
        anchor: &mut Anchor,
        success: bool,
        confidence: f64,
        at: DateTime<Utc>,
    ) {
        anchor.match_count = anchor.match_count.saturating_add(1);
        let rate = anchor.success_rate.clamp(0.0, 1.0);
        anchor.success_rate = if success {
            self.policy.success_alpha + (1.0 - self.policy.success_alpha) * rate
        } else {
            anchor.failure_count = anchor.failure_count.saturating_add(1);
            (1.0 - self.policy.failure_alpha) * rate
        }
        .clamp(0.0, 1.0);
        anchor.last_matched = Some(at);

        let penalty = (anchor.failure_count as f64 * self.policy.failure_penalty)
            .min(self.policy.max_failure_penalty);
        anchor.stability_score = (anchor.success_rate * (1.0 - penalty)).clamp(0.0, 1.0);

        tracing::trace!(
            anchor = %anchor.id,
            success,
            confidence,
            success_rate = anchor.success_rate,
            stability = anchor.stability_score,
            "outcome recorded"
        );
    }

    /// Apply an outcome and append it to the anchor's history.
    pub fn record_with_history(
        &self,
        anchor: &mut Anchor,
        history: &mut OutcomeHistory,
        success: bool,
        confidence: f64,
        locator: Option<LocatorTarget>,
        at: DateTime<Utc>,
    ) {
        let confidence = if success { confidence } else { 0.0 };
        self.record_outcome_at(anchor, success, confidence, at);
        history.push(OutcomeSample {
            at,
            success,
            confidence,
            locator,
        });
    }
}
