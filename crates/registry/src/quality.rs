//! Advisory anchor quality score. Never blocks creation.

use anchor_core_types::AnchorId;
use anchor_locator::Anchor;
use serde::Serialize;

const LOCATOR_WEIGHT: f64 = 0.35;
const VALIDATION_WEIGHT: f64 = 0.25;
const STABILITY_WEIGHT: f64 = 0.25;
const TOLERANCE_WEIGHT: f64 = 0.15;

/// Rule count that earns full validation coverage.
const FULL_RULE_COVERAGE: usize = 3;
const ISSUE_FLOOR: f64 = 0.6;

// Reference tolerances: anything at or below these counts as tight.
const TIGHT_POSITION: f64 = 10.0;
const TIGHT_SIZE: f64 = 0.1;
const TIGHT_TEXT: f64 = 2.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QualityIssue {
    pub component: &'static str,
    pub score: f64,
    pub remediation: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QualityReport {
    pub anchor_id: AnchorId,
    pub locator_score: f64,
    pub validation_score: f64,
    pub stability_score: f64,
    pub tolerance_score: f64,
    pub overall_score: f64,
    pub issues: Vec<QualityIssue>,
}

fn tightness(reference: f64, actual: f64) -> f64 {
    if !actual.is_finite() || actual < 0.0 {
        0.0
    } else if actual <= reference {
        1.0
    } else {
        reference / actual
    }
}

fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub fn score_anchor_quality(anchor: &Anchor) -> QualityReport {
    let locator_score = unit(anchor.average_reliability());
    let validation_score =
        anchor.validation_rules.len().min(FULL_RULE_COVERAGE) as f64 / FULL_RULE_COVERAGE as f64;
    let stability_score = unit(anchor.stability_score);
    let tolerance = &anchor.tolerance;
    let tolerance_score = (tightness(TIGHT_POSITION, tolerance.position)
        + tightness(TIGHT_SIZE, tolerance.size)
        + tightness(TIGHT_TEXT, f64::from(tolerance.text)))
        / 3.0;

    let overall_score = locator_score * LOCATOR_WEIGHT
        + validation_score * VALIDATION_WEIGHT
        + stability_score * STABILITY_WEIGHT
        + tolerance_score * TOLERANCE_WEIGHT;

    let mut issues = Vec::new();
    if locator_score < ISSUE_FLOOR {
        issues.push(QualityIssue {
            component: "locator",
            score: locator_score,
            remediation: if anchor.secondary_locators.is_empty() {
                "add a backup locator such as an element id or attribute".to_string()
            } else {
                "replace low-reliability locators with id or attribute locators".to_string()
            },
        });
    }
    if anchor.validation_rules.len() < FULL_RULE_COVERAGE {
        issues.push(QualityIssue {
            component: "validation",
            score: validation_score,
            remediation: format!(
                "add {} more validation rule(s), e.g. exists, visible or enabled",
                FULL_RULE_COVERAGE - anchor.validation_rules.len()
            ),
        });
    }
    if stability_score < ISSUE_FLOOR {
        issues.push(QualityIssue {
            component: "stability",
            score: stability_score,
            remediation: "review recent match failures and consider the cascade_fallback strategy"
                .to_string(),
        });
    }
    if tolerance_score < ISSUE_FLOOR {
        issues.push(QualityIssue {
            component: "tolerance",
            score: tolerance_score,
            remediation: format!(
                "tighten tolerances towards position {}px, size {}, text {}",
                TIGHT_POSITION, TIGHT_SIZE, TIGHT_TEXT
            ),
        });
    }

    QualityReport {
        anchor_id: anchor.id.clone(),
        locator_score,
        validation_score,
        stability_score,
        tolerance_score,
        overall_score: unit(overall_score),
        issues,
    }
}
