//! Locator selection strategies
//!
//! Each strategy turns an anchor into the ordered list of locators the engine
//! will try. Ordering is fully deterministic: sorts are stable, so equal
//! keys keep the declared order (primary first).

use anchor_policy::AdaptivePolicy;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::types::{Anchor, Locator, LocatorSlot, MatchStrategy};

pub type SelectedLocator<'a> = (LocatorSlot, &'a Locator);

/// Success rate used by the adaptive strategy; halved once the anchor is stale.
///
/// A window too large to represent never expires.
pub fn decayed_success_rate(anchor: &Anchor, policy: &AdaptivePolicy, now: DateTime<Utc>) -> f64 {
    let window = Duration::try_days(policy.stale_after_days);
    match (anchor.last_matched, window) {
        (Some(last), Some(window)) if now - last > window => anchor.success_rate / 2.0,
        _ => anchor.success_rate,
    }
}

pub fn select_locators<'a>(
    anchor: &'a Anchor,
    policy: &AdaptivePolicy,
    now: DateTime<Utc>,
) -> Vec<SelectedLocator<'a>> {
    let mut selected: Vec<SelectedLocator<'a>> = anchor.locators().collect();
    match anchor.strategy {
        MatchStrategy::PrimaryFirst
        | MatchStrategy::CascadeFallback
        | MatchStrategy::ParallelValidation => {}
        MatchStrategy::MostReliable => {
            selected.sort_by(|a, b| b.1.reliability.total_cmp(&a.1.reliability));
        }
        MatchStrategy::WeightedSelection => {
            selected.sort_by(|a, b| b.1.weight.total_cmp(&a.1.weight));
        }
        MatchStrategy::Adaptive => {
            let rate = decayed_success_rate(anchor, policy, now);
            if rate > policy.high_success {
                selected.truncate(1);
            } else if rate >= policy.low_success {
                selected.retain(|(_, locator)| locator.reliability > policy.reliable_locator);
            }
            debug!(
                anchor = %anchor.id,
                decayed_rate = rate,
                locators = selected.len(),
                "adaptive locator selection"
            );
        }
    }
    selected
}
