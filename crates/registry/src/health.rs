//! Structural validation sweep, independent of live matching.

use anchor_core_types::{AnchorId, ApplicationId};
use anchor_locator::{Anchor, Locator, ValidationCheck, Validator};
use serde::Serialize;
use tracing::{info, warn};

use crate::state::AnchorRegistry;

/// Position tolerance above which an anchor is considered loosely pinned.
const LOOSE_POSITION_TOLERANCE: f64 = 50.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn invalidates(&self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Locator,
    Tolerance,
    Threshold,
    Validation,
    Geometry,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthIssue {
    pub anchor_id: AnchorId,
    pub anchor_name: String,
    pub severity: Severity,
    pub category: IssueCategory,
    pub description: String,
    pub impact: String,
    pub suggested_fix: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationReport {
    pub application_id: ApplicationId,
    pub total_count: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
    pub issues: Vec<HealthIssue>,
    /// `valid_count / total_count`, 1.0 for an empty application
    pub overall_health: f64,
}

impl ValidationReport {
    pub fn issues_at(&self, severity: Severity) -> impl Iterator<Item = &HealthIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }
}

struct IssueSink<'a> {
    anchor: &'a Anchor,
    issues: Vec<HealthIssue>,
}

impl<'a> IssueSink<'a> {
    fn push(
        &mut self,
        severity: Severity,
        category: IssueCategory,
        description: String,
        impact: &str,
        suggested_fix: &str,
    ) {
        self.issues.push(HealthIssue {
            anchor_id: self.anchor.id.clone(),
            anchor_name: self.anchor.name.clone(),
            severity,
            category,
            description,
            impact: impact.to_string(),
            suggested_fix: suggested_fix.to_string(),
        });
    }
}

fn in_unit(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

fn check_locator_values(sink: &mut IssueSink<'_>, label: &str, locator: &Locator) {
    if !in_unit(locator.weight) || !in_unit(locator.reliability) {
        sink.push(
            Severity::High,
            IssueCategory::Locator,
            format!(
                "{} locator {} has weight {} and reliability {}",
                label, locator.target, locator.weight, locator.reliability
            ),
            "confidence scores built on this locator are meaningless",
            "keep weight and reliability within [0,1]",
        );
    }
}

/// Every issue found on one anchor.
pub fn inspect_anchor(anchor: &Anchor, validator: &Validator) -> Vec<HealthIssue> {
    let mut sink = IssueSink {
        anchor,
        issues: Vec::new(),
    };

    if anchor.primary_locator.target.is_blank() {
        sink.push(
            Severity::Critical,
            IssueCategory::Locator,
            format!("primary locator ({}) has no payload", anchor.primary_locator.kind()),
            "the anchor can only match through its secondaries",
            "give the primary locator a concrete value",
        );
    }
    check_locator_values(&mut sink, "primary", &anchor.primary_locator);
    for (idx, locator) in anchor.secondary_locators.iter().enumerate() {
        if locator.target.is_blank() {
            sink.push(
                Severity::High,
                IssueCategory::Locator,
                format!("secondary locator #{} ({}) has no payload", idx, locator.kind()),
                "the fallback never finds anything",
                "remove the locator or give it a value",
            );
        }
        check_locator_values(&mut sink, &format!("secondary #{}", idx), locator);
    }

    let locators: Vec<&Locator> = anchor.locators().map(|(_, l)| l).collect();
    for (idx, locator) in locators.iter().enumerate() {
        if locators[..idx].iter().any(|earlier| earlier.same_target(locator)) {
            sink.push(
                Severity::Medium,
                IssueCategory::Locator,
                format!("locator {} is declared more than once", locator.target),
                "duplicates add evaluation cost without extra coverage",
                "drop the duplicate locator",
            );
        }
    }
    if anchor.secondary_locators.is_empty() {
        sink.push(
            Severity::Low,
            IssueCategory::Locator,
            "anchor has no secondary locators".to_string(),
            "any change to the primary target breaks the anchor",
            "add at least one backup locator of a different kind",
        );
    }

    let tolerance = &anchor.tolerance;
    if !tolerance.position.is_finite()
        || tolerance.position < 0.0
        || !in_unit(tolerance.size)
        || !in_unit(tolerance.visual)
    {
        sink.push(
            Severity::High,
            IssueCategory::Tolerance,
            format!(
                "tolerance out of range (position {}, size {}, visual {})",
                tolerance.position, tolerance.size, tolerance.visual
            ),
            "geometry scores cannot be computed reliably",
            "use a non-negative position tolerance and size/visual tolerances in [0,1]",
        );
    } else if tolerance.position > LOOSE_POSITION_TOLERANCE {
        sink.push(
            Severity::Low,
            IssueCategory::Tolerance,
            format!("position tolerance of {}px is loose", tolerance.position),
            "nearby elements may be accepted as this anchor",
            "tighten the position tolerance",
        );
    }

    if !in_unit(anchor.matching_threshold) || !in_unit(anchor.confidence_threshold) {
        sink.push(
            Severity::High,
            IssueCategory::Threshold,
            format!(
                "thresholds out of range (matching {}, confidence {})",
                anchor.matching_threshold, anchor.confidence_threshold
            ),
            "the anchor either always or never matches",
            "keep both thresholds within [0,1]",
        );
    }

    if anchor.validation_rules.is_empty() {
        sink.push(
            Severity::Medium,
            IssueCategory::Validation,
            "anchor has no validation rules".to_string(),
            "a confident but wrong element is never vetoed",
            "add exists and visible rules",
        );
    }
    for rule in &anchor.validation_rules {
        if let ValidationCheck::Custom(name) = &rule.check {
            if !validator.has_custom(name) {
                sink.push(
                    Severity::High,
                    IssueCategory::Validation,
                    format!("custom predicate '{}' is not registered", name),
                    "the rule fails on every candidate",
                    "register the predicate on the engine or remove the rule",
                );
            }
        }
    }

    if anchor.expected_bounds.is_none() {
        sink.push(
            Severity::Medium,
            IssueCategory::Geometry,
            "anchor has no expected bounds".to_string(),
            "position and size agreement are scored neutrally",
            "record the element's bounds when the anchor is created",
        );
    }

    sink.issues
}

impl AnchorRegistry {
    pub fn validate(&self, application: &ApplicationId) -> ValidationReport {
        let mut report = ValidationReport {
            application_id: application.clone(),
            total_count: 0,
            valid_count: 0,
            invalid_count: 0,
            issues: Vec::new(),
            overall_health: 1.0,
        };

        for cell in self.cells_for(application) {
            let anchor = cell.lock().anchor.clone();
            let issues = inspect_anchor(&anchor, self.engine().validator());
            report.total_count += 1;
            if issues.iter().any(|i| i.severity.invalidates()) {
                report.invalid_count += 1;
                warn!(anchor = %anchor.id, issues = issues.len(), "anchor failed validation");
            } else {
                report.valid_count += 1;
            }
            report.issues.extend(issues);
        }

        if report.total_count > 0 {
            report.overall_health = report.valid_count as f64 / report.total_count as f64;
        }
        info!(
            application = %application,
            total = report.total_count,
            invalid = report.invalid_count,
            health = report.overall_health,
            "validation sweep finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CreateAnchorRequest;
    use anchor_core_types::Bounds;
    use anchor_locator::ValidationRule;

    fn anchor() -> Anchor {
        Anchor::new(
            ApplicationId::from("app"),
            "login",
            "button",
            Locator::element_id("login"),
        )
    }

    #[test]
    fn well_formed_anchor_has_no_invalidating_issues() {
        let anchor = anchor()
            .with_secondary(Locator::css("button.login"))
            .with_expected_bounds(Bounds::new(0.0, 0.0, 10.0, 10.0))
            .with_rule(ValidationRule::required(ValidationCheck::Exists));
        assert!(inspect_anchor(&anchor, &Validator::new()).is_empty());
    }

    #[test]
    fn blank_primary_is_critical() {
        let mut anchor = anchor();
        anchor.primary_locator = Locator::element_id("");
        let issues = inspect_anchor(&anchor, &Validator::new());
        assert!(issues.iter().any(|i| i.severity == Severity::Critical));
    }

    #[test]
    fn findings_are_categorised() {
        let mut anchor = anchor()
            .with_secondary(Locator::element_id("login"))
            .with_rule(ValidationRule::required(ValidationCheck::Custom("nope".into())));
        anchor.tolerance.position = 80.0;
        let issues = inspect_anchor(&anchor, &Validator::new());

        let has = |severity, category| {
            issues
                .iter()
                .any(|i| i.severity == severity && i.category == category)
        };
        assert!(has(Severity::High, IssueCategory::Validation));
        assert!(has(Severity::Medium, IssueCategory::Locator));
        assert!(has(Severity::Medium, IssueCategory::Geometry));
        assert!(has(Severity::Low, IssueCategory::Tolerance));
        assert!(issues.iter().all(|i| !i.suggested_fix.is_empty()));
    }

    #[test]
    fn health_is_fraction_of_valid_anchors() {
        let registry = AnchorRegistry::new();
        let app = ApplicationId::from("app");
        assert_eq!(registry.validate(&app).overall_health, 1.0);

        let good = registry
            .create(CreateAnchorRequest::new(
                "app",
                "good",
                "button",
                Locator::element_id("good"),
            ))
            .unwrap();
        let bad = registry
            .create(CreateAnchorRequest::new(
                "app",
                "bad",
                "button",
                Locator::element_id("bad"),
            ))
            .unwrap();
        // definitions checked at create time can still drift later
        {
            let cells = registry.cells_for(&app);
            for cell in cells {
                let mut tracked = cell.lock();
                if tracked.anchor.id == bad.id {
                    tracked.anchor.matching_threshold = 3.0;
                }
            }
        }

        let report = registry.validate(&app);
        assert_eq!(report.total_count, 2);
        assert_eq!(report.valid_count, 1);
        assert_eq!(report.invalid_count, 1);
        assert!((report.overall_health - 0.5).abs() < 1e-9);
        assert!(report
            .issues_at(Severity::High)
            .all(|i| i.anchor_id == bad.id));
        assert!(report.issues.iter().any(|i| i.anchor_id == good.id));
    }
}
