//! Daily outcome trends derived from per-anchor history.

use std::collections::BTreeMap;

use anchor_core_types::ApplicationId;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::state::AnchorRegistry;

/// Longest trend window, in days (about ten years).
pub const MAX_TREND_DAYS: u32 = 3_660;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrendBucket {
    pub day: NaiveDate,
    pub attempts: u64,
    pub successes: u64,
    pub success_rate: f64,
    /// Mean confidence of the successful attempts
    pub mean_confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrendReport {
    pub application_id: ApplicationId,
    pub days: u32,
    /// One bucket per day in the window, oldest first; quiet days are zero.
    pub buckets: Vec<TrendBucket>,
}

impl TrendReport {
    pub fn success_trend(&self) -> Vec<f64> {
        self.buckets.iter().map(|b| b.success_rate).collect()
    }

    pub fn confidence_trend(&self) -> Vec<f64> {
        self.buckets.iter().map(|b| b.mean_confidence).collect()
    }

    pub fn volume_trend(&self) -> Vec<u64> {
        self.buckets.iter().map(|b| b.attempts).collect()
    }
}

#[derive(Default)]
struct Tally {
    attempts: u64,
    successes: u64,
    confidence_total: f64,
}

impl AnchorRegistry {
    /// Bucket the last `days` UTC days (ending with the day of `now`).
    ///
    /// The window is clamped to `1..=MAX_TREND_DAYS`.
    pub fn trends(&self, application: &ApplicationId, days: u32, now: DateTime<Utc>) -> TrendReport {
        let days = days.clamp(1, MAX_TREND_DAYS);
        let last_day = now.date_naive();
        let first_day = Duration::try_days(i64::from(days) - 1)
            .and_then(|span| last_day.checked_sub_signed(span))
            .unwrap_or(NaiveDate::MIN);

        let mut tallies: BTreeMap<NaiveDate, Tally> = BTreeMap::new();
        for cell in self.cells_for(application) {
            let tracked = cell.lock();
            for sample in tracked.history.samples() {
                let day = sample.at.date_naive();
                if day < first_day || day > last_day {
                    continue;
                }
                let tally = tallies.entry(day).or_default();
                tally.attempts += 1;
                if sample.success {
                    tally.successes += 1;
                    tally.confidence_total += sample.confidence;
                }
            }
        }

        let buckets = first_day
            .iter_days()
            .take(days as usize)
            .map(|day| {
                let tally = tallies.remove(&day).unwrap_or_default();
                TrendBucket {
                    day,
                    attempts: tally.attempts,
                    successes: tally.successes,
                    success_rate: ratio(tally.successes as f64, tally.attempts),
                    mean_confidence: ratio(tally.confidence_total, tally.successes),
                }
            })
            .collect();

        TrendReport {
            application_id: application.clone(),
            days,
            buckets,
        }
    }
}

fn ratio(numerator: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        numerator / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CreateAnchorRequest;
    use anchor_core_types::{Bounds, Element};
    use anchor_locator::{Locator, MatchOptions};
    use chrono::TimeZone;

    #[test]
    fn buckets_follow_recorded_outcomes() {
        let registry = AnchorRegistry::new();
        let bounds = Bounds::new(10.0, 10.0, 50.0, 20.0);
        registry
            .create(
                CreateAnchorRequest::new("app", "ok", "button", Locator::element_id("ok"))
                    .with_expected_bounds(bounds),
            )
            .unwrap();
        let app = ApplicationId::from("app");
        let present = vec![Element::new("n1", "button", bounds).with_id("ok")];
        let absent = vec![Element::new("n2", "div", bounds)];

        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let yesterday = now - Duration::days(1);
        let options = MatchOptions::default();
        registry.match_all_at(&app, &present, &options, yesterday);
        registry.match_all_at(&app, &absent, &options, yesterday);
        registry.match_all_at(&app, &present, &options, now);
        registry.match_all_at(&app, &present, &options, now - Duration::days(10));

        let report = registry.trends(&app, 3, now);
        assert_eq!(report.buckets.len(), 3);
        assert_eq!(report.volume_trend(), vec![0, 2, 1]);
        assert_eq!(report.success_trend(), vec![0.0, 0.5, 1.0]);
        assert!((report.confidence_trend()[1] - 0.94).abs() < 1e-9);
        assert_eq!(report.buckets[2].day, now.date_naive());
    }

    #[test]
    fn unknown_application_yields_quiet_days() {
        let registry = AnchorRegistry::new();
        let report = registry.trends(&ApplicationId::from("none"), 7, Utc::now());
        assert_eq!(report.buckets.len(), 7);
        assert!(report.buckets.iter().all(|b| b.attempts == 0));
    }

    #[test]
    fn oversized_window_is_clamped() {
        let registry = AnchorRegistry::new();
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let report = registry.trends(&ApplicationId::from("app"), u32::MAX, now);
        assert_eq!(report.days, MAX_TREND_DAYS);
        assert_eq!(report.buckets.len(), MAX_TREND_DAYS as usize);
        assert_eq!(report.buckets.last().map(|b| b.day), Some(now.date_naive()));
    }
}
