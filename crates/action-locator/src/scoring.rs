//! Confidence scoring

use anchor_core_types::Bounds;
use serde::Serialize;

/// Geometry score used when an anchor has no reference rectangle.
pub const UNKNOWN_GEOMETRY_SCORE: f64 = 0.5;

const RELIABILITY_WEIGHT: f64 = 0.4;
const POSITION_WEIGHT: f64 = 0.3;
const SIZE_WEIGHT: f64 = 0.2;
const STABILITY_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceBreakdown {
    pub reliability: f64,
    pub position_match: f64,
    pub size_match: f64,
    pub stability: f64,
    pub confidence: f64,
}

/// `1 - offset / tolerance`, floored at zero. A zero tolerance demands an exact corner.
pub fn position_match(expected: Option<&Bounds>, actual: &Bounds, tolerance_px: f64) -> f64 {
    let Some(expected) = expected else {
        return UNKNOWN_GEOMETRY_SCORE;
    };
    let offset = expected.corner_offset(actual);
    if !offset.is_finite() {
        return 0.0;
    }
    if tolerance_px <= 0.0 {
        return if offset == 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - offset / tolerance_px).max(0.0)
}

fn axis_ratio(expected: f64, actual: f64) -> f64 {
    let (lo, hi) = if expected <= actual {
        (expected.max(0.0), actual.max(0.0))
    } else {
        (actual.max(0.0), expected.max(0.0))
    };
    if hi == 0.0 {
        1.0
    } else {
        lo / hi
    }
}

/// Mean of the width and height ratios; within `tolerance_size` counts as exact.
pub fn size_match(expected: Option<&Bounds>, actual: &Bounds, tolerance_size: f64) -> f64 {
    let Some(expected) = expected else {
        return UNKNOWN_GEOMETRY_SCORE;
    };
    let ratio = (axis_ratio(expected.width, actual.width)
        + axis_ratio(expected.height, actual.height))
        / 2.0;
    if !ratio.is_finite() {
        return 0.0;
    }
    if ratio >= 1.0 - tolerance_size {
        1.0
    } else {
        ratio
    }
}

pub fn confidence(
    reliability: f64,
    position_match: f64,
    size_match: f64,
    stability: f64,
) -> ConfidenceBreakdown {
    let raw = reliability * RELIABILITY_WEIGHT
        + position_match * POSITION_WEIGHT
        + size_match * SIZE_WEIGHT
        + stability * STABILITY_WEIGHT;
    let confidence = if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    };
    ConfidenceBreakdown {
        reliability,
        position_match,
        size_match,
        stability,
        confidence,
    }
}
