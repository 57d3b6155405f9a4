//! Core types for the anchor data model

use std::collections::BTreeMap;
use std::fmt;

use anchor_core_types::{AnchorId, ApplicationId, Bounds, Element};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Locator kind enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorKind {
    CssSelector,
    Xpath,
    ElementId,
    ElementText,
    Position,
    VisualPattern,
    Attribute,
}

impl LocatorKind {
    /// Get kind name as string
    pub fn name(&self) -> &'static str {
        match self {
            LocatorKind::CssSelector => "css_selector",
            LocatorKind::Xpath => "xpath",
            LocatorKind::ElementId => "element_id",
            LocatorKind::ElementText => "element_text",
            LocatorKind::Position => "position",
            LocatorKind::VisualPattern => "visual_pattern",
            LocatorKind::Attribute => "attribute",
        }
    }
}

impl fmt::Display for LocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind-specific locator payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LocatorTarget {
    /// Compound CSS selector (`tag#id.class[attr=value]`, comma separated)
    CssSelector(String),

    /// Restricted XPath (`//tag[@attr='v']`, `//*[text()='v']`)
    Xpath(String),

    /// Exact element id
    ElementId(String),

    /// Visible text, matched within `tolerance.text` edits
    ElementText(String),

    /// Expected top-left corner
    Position { x: f64, y: f64 },

    /// Hex-encoded visual signature
    VisualPattern(String),

    /// Attribute presence, or equality when `value` is set
    Attribute {
        name: String,
        #[serde(default)]
        value: Option<String>,
    },
}

impl LocatorTarget {
    pub fn kind(&self) -> LocatorKind {
        match self {
            LocatorTarget::CssSelector(_) => LocatorKind::CssSelector,
            LocatorTarget::Xpath(_) => LocatorKind::Xpath,
            LocatorTarget::ElementId(_) => LocatorKind::ElementId,
            LocatorTarget::ElementText(_) => LocatorKind::ElementText,
            LocatorTarget::Position { .. } => LocatorKind::Position,
            LocatorTarget::VisualPattern(_) => LocatorKind::VisualPattern,
            LocatorTarget::Attribute { .. } => LocatorKind::Attribute,
        }
    }

    /// Whether the payload carries anything to search for.
    pub fn is_blank(&self) -> bool {
        match self {
            LocatorTarget::CssSelector(v)
            | LocatorTarget::Xpath(v)
            | LocatorTarget::ElementId(v)
            | LocatorTarget::ElementText(v)
            | LocatorTarget::VisualPattern(v) => v.trim().is_empty(),
            LocatorTarget::Position { x, y } => !x.is_finite() || !y.is_finite(),
            LocatorTarget::Attribute { name, .. } => name.trim().is_empty(),
        }
    }
}

impl fmt::Display for LocatorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocatorTarget::CssSelector(v) => write!(f, "css:{}", v),
            LocatorTarget::Xpath(v) => write!(f, "xpath:{}", v),
            LocatorTarget::ElementId(v) => write!(f, "id:{}", v),
            LocatorTarget::ElementText(v) => write!(f, "text:{}", v),
            LocatorTarget::Position { x, y } => write!(f, "position:{},{}", x, y),
            LocatorTarget::VisualPattern(v) => write!(f, "visual:{}", v),
            LocatorTarget::Attribute { name, value: None } => write!(f, "attr:{}", name),
            LocatorTarget::Attribute {
                name,
                value: Some(value),
            } => write!(f, "attr:{}={}", name, value),
        }
    }
}

/// One way of finding an anchor's element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Locator {
    #[serde(flatten)]
    pub target: LocatorTarget,

    /// Relative importance among the anchor's locators (0.0-1.0)
    pub weight: f64,

    /// Observed historical accuracy (0.0-1.0)
    pub reliability: f64,
}

impl Locator {
    pub fn new(target: LocatorTarget, weight: f64, reliability: f64) -> Self {
        Self {
            target,
            weight,
            reliability,
        }
    }

    pub fn element_id(id: impl Into<String>) -> Self {
        Self::new(LocatorTarget::ElementId(id.into()), 1.0, 0.9)
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Self::new(LocatorTarget::CssSelector(selector.into()), 0.8, 0.7)
    }

    pub fn xpath(path: impl Into<String>) -> Self {
        Self::new(LocatorTarget::Xpath(path.into()), 0.7, 0.6)
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(LocatorTarget::ElementText(content.into()), 0.6, 0.6)
    }

    pub fn position(x: f64, y: f64) -> Self {
        Self::new(LocatorTarget::Position { x, y }, 0.4, 0.5)
    }

    pub fn attribute(name: impl Into<String>, value: Option<String>) -> Self {
        Self::new(
            LocatorTarget::Attribute {
                name: name.into(),
                value,
            },
            0.6,
            0.7,
        )
    }

    pub fn visual(signature: impl Into<String>) -> Self {
        Self::new(LocatorTarget::VisualPattern(signature.into()), 0.5, 0.5)
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn kind(&self) -> LocatorKind {
        self.target.kind()
    }

    /// Same kind and payload, ignoring weight and reliability.
    pub fn same_target(&self, other: &Locator) -> bool {
        self.target == other.target
    }
}

/// Position of a locator within its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorSlot {
    Primary,
    Secondary(usize),
}

/// Locator-selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Primary, then secondaries in declared order
    #[default]
    PrimaryFirst,

    /// All locators by descending reliability
    MostReliable,

    /// All locators by descending weight
    WeightedSelection,

    /// Declared order; the first validated candidate decides the outcome
    CascadeFallback,

    /// Every locator evaluated; best validated confidence wins
    ParallelValidation,

    /// Locator set chosen from the anchor's recent success rate
    Adaptive,
}

impl MatchStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            MatchStrategy::PrimaryFirst => "primary_first",
            MatchStrategy::MostReliable => "most_reliable",
            MatchStrategy::WeightedSelection => "weighted_selection",
            MatchStrategy::CascadeFallback => "cascade_fallback",
            MatchStrategy::ParallelValidation => "parallel_validation",
            MatchStrategy::Adaptive => "adaptive",
        }
    }
}

/// Matching tolerances for one anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Allowed top-left offset in pixels
    pub position: f64,

    /// Allowed relative size deviation (0.0-1.0)
    pub size: f64,

    /// Allowed text edit distance
    pub text: u32,

    /// Minimum visual similarity (0.0-1.0)
    pub visual: f64,

    /// Maximum age of a candidate snapshot, in milliseconds
    pub temporal_ms: u64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::from(&anchor_policy::TolerancePolicy::default())
    }
}

impl From<&anchor_policy::TolerancePolicy> for Tolerance {
    fn from(policy: &anchor_policy::TolerancePolicy) -> Self {
        Self {
            position: policy.position,
            size: policy.size,
            text: policy.text,
            visual: policy.visual,
            temporal_ms: policy.temporal_ms,
        }
    }
}

/// Check performed by a validation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "condition", rename_all = "snake_case")]
pub enum ValidationCheck {
    Exists,
    Visible,
    Enabled,
    ContainsText(String),
    /// Named predicate registered on the engine, or `attr:<name>[=<value>]`
    Custom(String),
}

impl ValidationCheck {
    pub fn name(&self) -> &'static str {
        match self {
            ValidationCheck::Exists => "exists",
            ValidationCheck::Visible => "visible",
            ValidationCheck::Enabled => "enabled",
            ValidationCheck::ContainsText(_) => "contains_text",
            ValidationCheck::Custom(_) => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(flatten)]
    pub check: ValidationCheck,

    /// A failing required rule vetoes the match in every mode
    pub required: bool,

    pub error_message: String,
}

impl ValidationRule {
    pub fn new(check: ValidationCheck, required: bool) -> Self {
        let error_message = match &check {
            ValidationCheck::Exists => "element does not exist".to_string(),
            ValidationCheck::Visible => "element is not visible".to_string(),
            ValidationCheck::Enabled => "element is disabled".to_string(),
            ValidationCheck::ContainsText(text) => format!("element text lacks '{}'", text),
            ValidationCheck::Custom(name) => format!("custom check '{}' failed", name),
        };
        Self {
            check,
            required,
            error_message,
        }
    }

    pub fn required(check: ValidationCheck) -> Self {
        Self::new(check, true)
    }

    pub fn optional(check: ValidationCheck) -> Self {
        Self::new(check, false)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }
}

/// Durable reference to one UI element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: AnchorId,
    pub application_id: ApplicationId,
    pub name: String,
    #[serde(rename = "type")]
    pub anchor_type: String,
    pub purpose: String,
    #[serde(default)]
    pub container: Option<String>,

    pub primary_locator: Locator,
    #[serde(default)]
    pub secondary_locators: Vec<Locator>,
    #[serde(default)]
    pub strategy: MatchStrategy,
    #[serde(default)]
    pub expected_bounds: Option<Bounds>,
    #[serde(default)]
    pub tolerance: Tolerance,

    pub stability_score: f64,
    pub success_rate: f64,
    pub match_count: u64,
    pub failure_count: u64,
    #[serde(default)]
    pub last_matched: Option<DateTime<Utc>>,

    pub matching_threshold: f64,
    pub confidence_threshold: f64,

    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_properties: BTreeMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Anchor {
    /// Create an anchor with fresh statistics and default policy values.
    pub fn new(
        application_id: ApplicationId,
        name: impl Into<String>,
        anchor_type: impl Into<String>,
        primary_locator: Locator,
    ) -> Self {
        let matching = anchor_policy::MatchingPolicy::default();
        let stats = anchor_policy::StatisticsPolicy::default();
        let now = Utc::now();
        Self {
            id: AnchorId::new(),
            application_id,
            name: name.into(),
            anchor_type: anchor_type.into(),
            purpose: String::new(),
            container: None,
            primary_locator,
            secondary_locators: Vec::new(),
            strategy: MatchStrategy::default(),
            expected_bounds: None,
            tolerance: Tolerance::default(),
            stability_score: stats.initial_stability,
            success_rate: 0.0,
            match_count: 0,
            failure_count: 0,
            last_matched: None,
            matching_threshold: matching.default_matching_threshold,
            confidence_threshold: matching.default_confidence_threshold,
            validation_rules: Vec::new(),
            tags: Vec::new(),
            custom_properties: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_secondary(mut self, locator: Locator) -> Self {
        self.secondary_locators.push(locator);
        self
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
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

    /// Primary followed by secondaries in declared order.
    pub fn locators(&self) -> impl Iterator<Item = (LocatorSlot, &Locator)> {
        std::iter::once((LocatorSlot::Primary, &self.primary_locator)).chain(
            self.secondary_locators
                .iter()
                .enumerate()
                .map(|(idx, locator)| (LocatorSlot::Secondary(idx), locator)),
        )
    }

    pub fn locator_count(&self) -> usize {
        1 + self.secondary_locators.len()
    }

    pub fn locator_at(&self, slot: LocatorSlot) -> Option<&Locator> {
        match slot {
            LocatorSlot::Primary => Some(&self.primary_locator),
            LocatorSlot::Secondary(idx) => self.secondary_locators.get(idx),
        }
    }

    /// Mean reliability across all locators.
    pub fn average_reliability(&self) -> f64 {
        let total: f64 = self.locators().map(|(_, l)| l.reliability).sum();
        total / self.locator_count() as f64
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Accepted match of one anchor in one pass. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct AnchorMatch {
    pub anchor_id: AnchorId,
    pub anchor_name: String,
    pub element: Element,
    pub confidence: f64,
    pub locator: Locator,
    pub locator_slot: LocatorSlot,
    pub validation: Vec<crate::validation::RuleOutcome>,
    pub position_match: f64,
    pub size_match: f64,
    pub is_stable: bool,
    pub requires_adaptation: bool,
}

impl AnchorMatch {
    /// Check if this is a high-confidence match (>= 0.8)
    pub fn is_high_confidence(&self) -> bool {
        self.confidence >= 0.8
    }
}
