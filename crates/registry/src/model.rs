use std::collections::BTreeMap;

use anchor_core_types::{AnchorError, Bounds};
use anchor_locator::{
    Anchor, Locator, MatchStrategy, OutcomeHistory, Tolerance, ValidationCheck, ValidationRule,
    Validator,
};
use serde::{Deserialize, Serialize};

/// Request to register a new anchor.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateAnchorRequest {
    pub application_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub anchor_type: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub container: Option<String>,
    pub primary_locator: Option<Locator>,
    #[serde(default)]
    pub secondary_locators: Vec<Locator>,
    #[serde(default)]
    pub strategy: Option<MatchStrategy>,
    #[serde(default)]
    pub expected_bounds: Option<Bounds>,
    #[serde(default)]
    pub tolerance: Option<Tolerance>,
    #[serde(default)]
    pub matching_threshold: Option<f64>,
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_properties: BTreeMap<String, serde_json::Value>,
}

impl CreateAnchorRequest {
    pub fn new(
        application_id: impl Into<String>,
        name: impl Into<String>,
        anchor_type: impl Into<String>,
        primary_locator: Locator,
    ) -> Self {
        Self {
            application_id: application_id.into(),
            name: name.into(),
            anchor_type: anchor_type.into(),
            primary_locator: Some(primary_locator),
            ..Self::default()
        }
    }

    pub fn with_secondary(mut self, locator: Locator) -> Self {
        self.secondary_locators.push(locator);
        self
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_expected_bounds(mut self, bounds: Bounds) -> Self {
        self.expected_bounds = Some(bounds);
        self
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.validation_rules.push(rule);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = purpose.into();
        self
    }

    pub fn with_matching_threshold(mut self, threshold: f64) -> Self {
        self.matching_threshold = Some(threshold);
        self
    }
}

/// Partial update; `None` leaves a field untouched. Statistics are not updatable.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AnchorUpdate {
    pub name: Option<String>,
    pub anchor_type: Option<String>,
    pub purpose: Option<String>,
    pub container: Option<Option<String>>,
    pub primary_locator: Option<Locator>,
    pub secondary_locators: Option<Vec<Locator>>,
    pub strategy: Option<MatchStrategy>,
    pub expected_bounds: Option<Option<Bounds>>,
    pub tolerance: Option<Tolerance>,
    pub matching_threshold: Option<f64>,
    pub confidence_threshold: Option<f64>,
    pub validation_rules: Option<Vec<ValidationRule>>,
    pub tags: Option<Vec<String>>,
    pub custom_properties: Option<BTreeMap<String, serde_json::Value>>,
}

impl AnchorUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.anchor_type.is_none()
            && self.purpose.is_none()
            && self.container.is_none()
            && self.primary_locator.is_none()
            && self.secondary_locators.is_none()
            && self.strategy.is_none()
            && self.expected_bounds.is_none()
            && self.tolerance.is_none()
            && self.matching_threshold.is_none()
            && self.confidence_threshold.is_none()
            && self.validation_rules.is_none()
            && self.tags.is_none()
            && self.custom_properties.is_none()
    }

    pub(crate) fn apply(self, anchor: &mut Anchor) {
        if let Some(name) = self.name {
            anchor.name = name;
        }
        if let Some(anchor_type) = self.anchor_type {
            anchor.anchor_type = anchor_type;
        }
        if let Some(purpose) = self.purpose {
            anchor.purpose = purpose;
        }
        if let Some(container) = self.container {
            anchor.container = container;
        }
        if let Some(primary) = self.primary_locator {
            anchor.primary_locator = primary;
        }
        if let Some(secondaries) = self.secondary_locators {
            anchor.secondary_locators = secondaries;
        }
        if let Some(strategy) = self.strategy {
            anchor.strategy = strategy;
        }
        if let Some(bounds) = self.expected_bounds {
            anchor.expected_bounds = bounds;
        }
        if let Some(tolerance) = self.tolerance {
            anchor.tolerance = tolerance;
        }
        if let Some(threshold) = self.matching_threshold {
            anchor.matching_threshold = threshold;
        }
        if let Some(threshold) = self.confidence_threshold {
            anchor.confidence_threshold = threshold;
        }
        if let Some(rules) = self.validation_rules {
            anchor.validation_rules = rules;
        }
        if let Some(tags) = self.tags {
            anchor.tags = tags;
        }
        if let Some(properties) = self.custom_properties {
            anchor.custom_properties = properties;
        }
    }
}

/// In-memory filter over the registry. Every set field must hold.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AnchorQuery {
    pub application_id: Option<String>,
    pub name_contains: Option<String>,
    pub anchor_type: Option<String>,
    pub purpose_contains: Option<String>,
    /// Anchor must carry at least one of these tags
    #[serde(default)]
    pub tags: Vec<String>,
    pub container: Option<String>,
    pub min_stability: Option<f64>,
    pub min_success_rate: Option<f64>,
}

impl AnchorQuery {
    pub fn for_application(application_id: impl Into<String>) -> Self {
        Self {
            application_id: Some(application_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, anchor: &Anchor) -> bool {
        fn contains_ci(haystack: &str, needle: &str) -> bool {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        }

        self.application_id
            .as_deref()
            .map_or(true, |app| anchor.application_id.as_str() == app)
            && self
                .name_contains
                .as_deref()
                .map_or(true, |needle| contains_ci(&anchor.name, needle))
            && self
                .anchor_type
                .as_deref()
                .map_or(true, |t| anchor.anchor_type.eq_ignore_ascii_case(t))
            && self
                .purpose_contains
                .as_deref()
                .map_or(true, |needle| contains_ci(&anchor.purpose, needle))
            && (self.tags.is_empty() || self.tags.iter().any(|tag| anchor.has_tag(tag)))
            && self
                .container
                .as_deref()
                .map_or(true, |c| anchor.container.as_deref() == Some(c))
            && self
                .min_stability
                .map_or(true, |min| anchor.stability_score >= min)
            && self
                .min_success_rate
                .map_or(true, |min| anchor.success_rate >= min)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RegistryStats {
    pub anchors: usize,
    pub applications: usize,
    pub total_matches: u64,
    pub total_failures: u64,
    pub mean_success_rate: f64,
    pub audit_events: usize,
}

/// Anchor plus its outcome history, guarded together by one lock.
#[derive(Debug, Clone)]
pub(crate) struct TrackedAnchor {
    pub anchor: Anchor,
    pub history: OutcomeHistory,
}

fn in_unit(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

fn check_locator(label: &str, locator: &Locator) -> Result<(), AnchorError> {
    if locator.target.is_blank() {
        return Err(AnchorError::configuration(format!(
            "{} locator ({}) has an empty payload",
            label,
            locator.kind()
        )));
    }
    if !in_unit(locator.weight) {
        return Err(AnchorError::configuration(format!(
            "{} locator weight {} is outside [0,1]",
            label, locator.weight
        )));
    }
    if !in_unit(locator.reliability) {
        return Err(AnchorError::configuration(format!(
            "{} locator reliability {} is outside [0,1]",
            label, locator.reliability
        )));
    }
    Ok(())
}

/// Rejects definitions the engine cannot match with.
pub(crate) fn check_anchor(anchor: &Anchor, validator: &Validator) -> Result<(), AnchorError> {
    if anchor.application_id.as_str().trim().is_empty() {
        return Err(AnchorError::configuration("application id is empty"));
    }
    if anchor.name.trim().is_empty() {
        return Err(AnchorError::configuration("anchor name is empty"));
    }
    check_locator("primary", &anchor.primary_locator)?;
    for (idx, locator) in anchor.secondary_locators.iter().enumerate() {
        check_locator(&format!("secondary #{}", idx), locator)?;
    }

    let tolerance = &anchor.tolerance;
    if !tolerance.position.is_finite() || tolerance.position < 0.0 {
        return Err(AnchorError::configuration(format!(
            "position tolerance {} must be a non-negative number",
            tolerance.position
        )));
    }
    if !in_unit(tolerance.size) {
        return Err(AnchorError::configuration(format!(
            "size tolerance {} is outside [0,1]",
            tolerance.size
        )));
    }
    if !in_unit(tolerance.visual) {
        return Err(AnchorError::configuration(format!(
            "visual tolerance {} is outside [0,1]",
            tolerance.visual
        )));
    }
    if !in_unit(anchor.matching_threshold) || !in_unit(anchor.confidence_threshold) {
        return Err(AnchorError::configuration("thresholds must lie in [0,1]"));
    }
    if let Some(bounds) = &anchor.expected_bounds {
        if !bounds.is_finite() || bounds.width < 0.0 || bounds.height < 0.0 {
            return Err(AnchorError::configuration(
                "expected bounds must be finite with non-negative size",
            ));
        }
    }
    for rule in &anchor.validation_rules {
        if let ValidationCheck::Custom(name) = &rule.check {
            if !validator.has_custom(name) {
                return Err(AnchorError::configuration(format!(
                    "custom validation predicate '{}' is not registered",
                    name
                )));
            }
        }
    }
    Ok(())
}
