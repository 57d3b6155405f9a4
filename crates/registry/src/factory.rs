//! Anchor synthesis from element samples, declarative patterns and
//! recorded interaction frequency.
//!
//! All three paths share one locator inference rule (id, then class, then
//! text, then a bare tag selector) and never create an anchor for an element
//! that an existing anchor of the application already covers. Each call
//! validates every anchor it would create before inserting any of them.

use std::collections::{BTreeMap, HashMap};

use anchor_core_types::{AnchorError, ApplicationId, Element};
use anchor_locator::{
    Anchor, Locator, LocatorKind, LocatorTarget, MatchStrategy, ValidationCheck, ValidationRule,
};
use anchor_policy::FactoryPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::{AnchorQuery, CreateAnchorRequest};
use crate::state::AnchorRegistry;

const POSITION_WEIGHT: f64 = 0.3;
const POSITION_RELIABILITY: f64 = 0.5;
const TEMPLATE_RELIABILITY: f64 = 0.7;
const INTERACTIVE_TYPES: &[&str] = &["button", "link", "input", "select", "checkbox"];

/// Named locator inside a pattern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocatorTemplate {
    pub name: String,
    #[serde(flatten)]
    pub target: LocatorTarget,
    pub weight: f64,
    #[serde(default)]
    pub reliability: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationTemplate {
    #[serde(flatten)]
    pub check: ValidationCheck,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_required() -> bool {
    true
}

impl ValidationTemplate {
    fn to_rule(&self) -> ValidationRule {
        let rule = ValidationRule::new(self.check.clone(), self.required);
        match &self.message {
            Some(message) => rule.with_message(message.clone()),
            None => rule,
        }
    }
}

/// Declarative recipe: one anchor per locator template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnchorPattern {
    pub name: String,
    pub application_id: String,
    #[serde(rename = "type")]
    pub anchor_type: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub strategy: Option<MatchStrategy>,
    pub locators: Vec<LocatorTemplate>,
    #[serde(default)]
    pub validations: Vec<ValidationTemplate>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub element: Element,
    pub action: String,
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorSession {
    pub session_id: String,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

/// Semantic type from an explicit role, else from the tag.
fn semantic_type(element: &Element) -> String {
    if let Some(role) = element.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        return role.to_ascii_lowercase();
    }
    let input_type = element
        .attributes
        .get("type")
        .map(|t| t.to_ascii_lowercase());
    match element.tag.as_str() {
        "button" => "button",
        "a" => "link",
        "select" => "select",
        "textarea" => "input",
        "input" => match input_type.as_deref() {
            Some("submit") | Some("button") | Some("reset") => "button",
            Some("checkbox") | Some("radio") => "checkbox",
            _ => "input",
        },
        "img" | "svg" | "canvas" => "image",
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => "heading",
        "p" | "span" | "label" => "text",
        _ => "container",
    }
    .to_string()
}

fn is_interactive(semantic: &str) -> bool {
    INTERACTIVE_TYPES.contains(&semantic)
}

/// Plain CSS identifier: safe to splice into a selector unescaped.
fn is_css_ident(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Locators in inference priority; the first is the primary. Empty when the
/// element offers nothing to locate it by.
fn infer_locators(element: &Element) -> Vec<Locator> {
    let tag = element.tag.trim();
    let tag = if is_css_ident(tag) { tag } else { "" };

    let mut locators = Vec::new();
    if let Some(id) = element.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        locators.push(Locator::element_id(id));
    }
    let classes: Vec<&str> = element
        .classes
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    if let Some(class) = classes.iter().find(|c| is_css_ident(c)) {
        locators.push(Locator::css(format!("{tag}.{class}")));
    } else if !classes.is_empty() {
        // classes like `md:flex` cannot be spliced into a selector
        locators.push(Locator::attribute("class", element.attribute("class")));
    }
    if let Some(text) = element.trimmed_text() {
        locators.push(Locator::text(text));
    }
    if locators.is_empty() && !tag.is_empty() {
        locators.push(Locator::css(tag));
    }
    locators
}

fn display_label(element: &Element) -> String {
    element
        .id
        .as_deref()
        .or_else(|| element.trimmed_text())
        .or_else(|| element.classes.first().map(String::as_str))
        .unwrap_or(element.handle.as_str())
        .to_string()
}

fn element_request(application: &ApplicationId, element: &Element) -> Option<CreateAnchorRequest> {
    let semantic = semantic_type(element);
    let mut locators = infer_locators(element).into_iter();
    let primary = locators.next()?;
    let mut request = CreateAnchorRequest {
        application_id: application.to_string(),
        name: format!("{}:{}", semantic, display_label(element)),
        anchor_type: semantic.clone(),
        primary_locator: Some(primary),
        secondary_locators: locators.collect(),
        expected_bounds: Some(element.bounds),
        ..CreateAnchorRequest::default()
    };
    request.secondary_locators.push(
        Locator::position(element.bounds.x, element.bounds.y)
            .with_weight(POSITION_WEIGHT)
            .with_reliability(POSITION_RELIABILITY),
    );
    request.validation_rules = vec![
        ValidationRule::required(ValidationCheck::Exists),
        ValidationRule::required(ValidationCheck::Visible),
    ];
    if is_interactive(&semantic) {
        request
            .validation_rules
            .push(ValidationRule::optional(ValidationCheck::Enabled));
    }
    Some(request)
}

/// Non-position locator targets already used by anchors of one application.
struct Coverage {
    targets: Vec<LocatorTarget>,
}

impl Coverage {
    fn of(registry: &AnchorRegistry, application: &ApplicationId) -> Self {
        let targets = registry
            .search(&AnchorQuery::for_application(application.as_str()))
            .iter()
            .flat_map(|anchor| {
                anchor
                    .locators()
                    .map(|(_, l)| l.target.clone())
                    .collect::<Vec<_>>()
            })
            .filter(|target| target.kind() != LocatorKind::Position)
            .collect();
        Self { targets }
    }

    fn covers(&self, element: &Element) -> bool {
        infer_locators(element)
            .iter()
            .any(|locator| self.targets.contains(&locator.target))
    }

    fn claim(&mut self, anchor: &Anchor) {
        self.targets.extend(
            anchor
                .locators()
                .map(|(_, l)| l.target.clone())
                .filter(|target| target.kind() != LocatorKind::Position),
        );
    }
}

pub struct AnchorFactory<'r> {
    registry: &'r AnchorRegistry,
    policy: FactoryPolicy,
}

impl<'r> AnchorFactory<'r> {
    pub fn new(registry: &'r AnchorRegistry) -> Self {
        Self {
            registry,
            policy: registry.policy().factory.clone(),
        }
    }

    /// Group samples by semantic type and anchor up to `max_per_group` of each.
    pub fn from_elements(
        &self,
        application: &ApplicationId,
        elements: &[Element],
    ) -> Result<Vec<Anchor>, AnchorError> {
        let mut groups: BTreeMap<String, Vec<&Element>> = BTreeMap::new();
        for element in elements {
            groups.entry(semantic_type(element)).or_default().push(element);
        }

        let mut coverage = Coverage::of(self.registry, application);
        let mut prepared = Vec::new();
        for (semantic, members) in groups {
            for element in members.into_iter().take(self.policy.max_per_group) {
                if coverage.covers(element) {
                    debug!(element = %element.handle, semantic = %semantic, "element already anchored");
                    continue;
                }
                let Some(request) = element_request(application, element) else {
                    warn!(element = %element.handle, semantic = %semantic, "no locator can be inferred; element skipped");
                    continue;
                };
                let anchor = self.registry.prepare(request)?;
                coverage.claim(&anchor);
                prepared.push(anchor);
            }
        }
        self.registry.commit(&prepared);
        info!(application = %application, created = prepared.len(), "anchors created from elements");
        Ok(prepared)
    }

    /// Instantiate one anchor per locator template. Names already present are skipped.
    pub fn from_pattern(&self, pattern: &AnchorPattern) -> Result<Vec<Anchor>, AnchorError> {
        for template in &pattern.locators {
            if template.target.is_blank() {
                return Err(AnchorError::configuration(format!(
                    "pattern '{}' template '{}' has an empty locator",
                    pattern.name, template.name
                )));
            }
            let reliability = template.reliability.unwrap_or(TEMPLATE_RELIABILITY);
            if !(0.0..=1.0).contains(&template.weight) || !(0.0..=1.0).contains(&reliability) {
                return Err(AnchorError::configuration(format!(
                    "pattern '{}' template '{}' has weight or reliability outside [0,1]",
                    pattern.name, template.name
                )));
            }
        }
        for template in &pattern.validations {
            if let ValidationCheck::Custom(name) = &template.check {
                if !self.registry.engine().validator().has_custom(name) {
                    return Err(AnchorError::configuration(format!(
                        "pattern '{}' uses unregistered predicate '{}'",
                        pattern.name, name
                    )));
                }
            }
        }

        let rules: Vec<ValidationRule> = pattern.validations.iter().map(|v| v.to_rule()).collect();
        let existing = self
            .registry
            .search(&AnchorQuery::for_application(pattern.application_id.as_str()));
        let mut prepared = Vec::new();
        for template in &pattern.locators {
            let name = format!("{}.{}", pattern.name, template.name);
            if existing.iter().any(|anchor| anchor.name == name) {
                debug!(anchor = %name, "pattern anchor already exists");
                continue;
            }
            let locator = Locator::new(
                template.target.clone(),
                template.weight,
                template.reliability.unwrap_or(TEMPLATE_RELIABILITY),
            );
            let mut request = CreateAnchorRequest::new(
                pattern.application_id.clone(),
                name,
                pattern.anchor_type.clone(),
                locator,
            )
            .with_purpose(pattern.purpose.clone());
            request.strategy = pattern.strategy;
            request.validation_rules = rules.clone();
            request.tags = pattern.tags.clone();
            prepared.push(self.registry.prepare(request)?);
        }
        self.registry.commit(&prepared);
        info!(pattern = %pattern.name, created = prepared.len(), "anchors created from pattern");
        Ok(prepared)
    }

    /// Anchor the most frequently used elements not yet covered.
    pub fn from_interactions(
        &self,
        application: &ApplicationId,
        sessions: &[BehaviorSession],
    ) -> Result<Vec<Anchor>, AnchorError> {
        let mut counts: HashMap<String, (usize, &Element)> = HashMap::new();
        for interaction in sessions.iter().flat_map(|s| s.interactions.iter()) {
            let Some(key) = infer_locators(&interaction.element)
                .first()
                .map(|l| l.target.to_string())
            else {
                debug!(element = %interaction.element.handle, "interaction target cannot be located");
                continue;
            };
            counts
                .entry(key)
                .or_insert((0, &interaction.element))
                .0 += 1;
        }

        let mut coverage = Coverage::of(self.registry, application);
        let min = self.policy.min_interactions;
        let mut ranked: Vec<(String, usize, &Element)> = counts
            .into_iter()
            .filter(|(_, (count, _))| *count >= min)
            .map(|(key, (count, element))| (key, count, element))
            .filter(|(_, _, element)| !coverage.covers(element))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.policy.max_frequency_anchors);

        let mut prepared = Vec::new();
        for (key, count, element) in ranked {
            if coverage.covers(element) {
                continue;
            }
            let Some(request) = element_request(application, element) else {
                continue;
            };
            let mut request = request.with_tag("frequent");
            request
                .custom_properties
                .insert("interaction_count".to_string(), serde_json::json!(count));
            let anchor = self.registry.prepare(request)?;
            debug!(anchor = %anchor.id, key = %key, count, "anchor prepared from interactions");
            coverage.claim(&anchor);
            prepared.push(anchor);
        }
        self.registry.commit(&prepared);
        info!(application = %application, created = prepared.len(), "anchors created from interactions");
        Ok(prepared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_core_types::Bounds;
    use anchor_locator::{
        DefaultLocatorEvaluator, EvalContext, LocatorEvaluator, LocatorSlot, MatchOptions, Tolerance,
    };

    fn bounds(n: f64) -> Bounds {
        Bounds::new(n * 10.0, 0.0, 40.0, 20.0)
    }

    #[test]
    fn locator_inference_follows_priority() {
        let with_id = Element::new("h", "button", bounds(0.0))
            .with_id("save")
            .with_class("primary")
            .with_text("Save");
        let kinds: Vec<_> = infer_locators(&with_id).iter().map(|l| l.kind()).collect();
        assert_eq!(
            kinds,
            vec![LocatorKind::ElementId, LocatorKind::CssSelector, LocatorKind::ElementText]
        );

        let bare = Element::new("h", "div", bounds(0.0));
        assert_eq!(
            infer_locators(&bare)[0].target,
            LocatorTarget::CssSelector("div".into())
        );

        let classed = Element::new("h", "a", bounds(0.0)).with_class("nav");
        assert_eq!(
            infer_locators(&classed)[0].target,
            LocatorTarget::CssSelector("a.nav".into())
        );
    }

    #[test]
    fn semantic_types() {
        let submit = Element::new("h", "input", bounds(0.0)).with_attribute("type", "submit");
        assert_eq!(semantic_type(&submit), "button");
        let tab = Element::new("h", "div", bounds(0.0)).with_role("Tab");
        assert_eq!(semantic_type(&tab), "tab");
        assert_eq!(semantic_type(&Element::new("h", "a", bounds(0.0))), "link");
    }

    #[test]
    fn from_elements_caps_groups_and_skips_covered() {
        let registry = AnchorRegistry::new();
        let app = ApplicationId::from("app");
        registry
            .create(CreateAnchorRequest::new(
                "app",
                "existing",
                "button",
                Locator::element_id("b0"),
            ))
            .unwrap();

        let mut elements: Vec<Element> = (0..7)
            .map(|n| Element::new(format!("b{n}"), "button", bounds(n as f64)).with_id(format!("b{n}")))
            .collect();
        elements.push(Element::new("t", "p", bounds(9.0)).with_text("Hello"));
        elements.push(Element::new("dup", "button", bounds(8.0)).with_id("b1"));

        let factory = AnchorFactory::new(&registry);
        let created = factory.from_elements(&app, &elements).unwrap();
        // b0 is covered; b1..b4 fill the button group of five samples
        let names: Vec<_> = created.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["button:b1", "button:b2", "button:b3", "button:b4", "text:Hello"]
        );

        let button = &created[0];
        assert_eq!(button.primary_locator.target, LocatorTarget::ElementId("b1".into()));
        let position = button.secondary_locators.last().unwrap();
        assert_eq!(position.kind(), LocatorKind::Position);
        assert_eq!(position.weight, 0.3);
        assert_eq!(button.validation_rules.len(), 3);
        assert!(!button.validation_rules[2].required);
        assert_eq!(created[4].validation_rules.len(), 2);

        let again = factory.from_elements(&app, &elements).unwrap();
        assert_eq!(again.len(), 0);
    }

    #[test]
    fn from_pattern_preserves_weights_and_skips_existing_names() {
        let registry = AnchorRegistry::new();
        let pattern = AnchorPattern {
            name: "checkout".into(),
            application_id: "shop".into(),
            anchor_type: "button".into(),
            purpose: "complete purchase".into(),
            strategy: Some(MatchStrategy::CascadeFallback),
            locators: vec![
                LocatorTemplate {
                    name: "pay".into(),
                    target: LocatorTarget::ElementId("pay".into()),
                    weight: 0.9,
                    reliability: None,
                },
                LocatorTemplate {
                    name: "confirm".into(),
                    target: LocatorTarget::ElementText("Confirm".into()),
                    weight: 0.4,
                    reliability: Some(0.8),
                },
            ],
            validations: vec![ValidationTemplate {
                check: ValidationCheck::Visible,
                required: true,
                message: Some("pay button hidden".into()),
            }],
            tags: vec!["checkout".into()],
        };

        let factory = AnchorFactory::new(&registry);
        let created = factory.from_pattern(&pattern).unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].name, "checkout.pay");
        assert_eq!(created[0].primary_locator.weight, 0.9);
        assert_eq!(created[0].primary_locator.reliability, 0.7);
        assert_eq!(created[1].primary_locator.weight, 0.4);
        assert_eq!(created[1].strategy, MatchStrategy::CascadeFallback);
        assert_eq!(
            created[0].validation_rules[0].error_message,
            "pay button hidden"
        );

        assert!(factory.from_pattern(&pattern).unwrap().is_empty());

        let mut broken = pattern.clone();
        broken.name = "broken".into();
        broken.locators[1].target = LocatorTarget::ElementId(" ".into());
        assert!(factory.from_pattern(&broken).unwrap_err().is_configuration());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn from_interactions_ranks_by_frequency() {
        let registry = AnchorRegistry::new();
        let app = ApplicationId::from("app");
        let click = |id: &str| Interaction {
            element: Element::new(id, "button", bounds(1.0)).with_id(id),
            action: "click".into(),
            at: None,
        };
        let session = |ids: &[&str]| BehaviorSession {
            session_id: "s".into(),
            interactions: ids.iter().map(|id| click(id)).collect(),
        };
        let sessions = vec![
            session(&["save", "save", "open", "open", "rare"]),
            session(&["save", "open", "save", "known", "known", "known"]),
        ];
        registry
            .create(CreateAnchorRequest::new(
                "app",
                "known",
                "button",
                Locator::element_id("known"),
            ))
            .unwrap();

        let created = AnchorFactory::new(&registry)
            .from_interactions(&app, &sessions)
            .unwrap();
        let names: Vec<_> = created.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["button:save", "button:open"]);
        assert!(created[0].has_tag("frequent"));
        assert_eq!(
            created[0].custom_properties.get("interaction_count"),
            Some(&serde_json::json!(4))
        );
    }

    #[test]
    fn utility_classes_fall_back_to_class_attribute() {
        let utility = Element::new("u", "div", bounds(0.0)).with_class("md:flex");
        let primary = infer_locators(&utility).remove(0);
        assert_eq!(
            primary.target,
            LocatorTarget::Attribute {
                name: "class".into(),
                value: Some("md:flex".into()),
            }
        );
        let tolerance = Tolerance::default();
        let ctx = EvalContext {
            tolerance: &tolerance,
            expected_bounds: None,
        };
        let found = DefaultLocatorEvaluator
            .locate(&primary, &ctx, std::slice::from_ref(&utility))
            .unwrap();
        assert_eq!(found.map(|e| e.handle.as_str()), Some("u"));

        let mixed = Element::new("m", "div", bounds(0.0))
            .with_class("w-1/2")
            .with_class("card");
        assert_eq!(
            infer_locators(&mixed)[0].target,
            LocatorTarget::CssSelector("div.card".into())
        );

        let registry = AnchorRegistry::new();
        let app = ApplicationId::from("app");
        let created = AnchorFactory::new(&registry)
            .from_elements(&app, std::slice::from_ref(&utility))
            .unwrap();
        assert_eq!(created.len(), 1);
        let results = registry.match_all(&app, &[utility], &MatchOptions::default());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].locator_slot, LocatorSlot::Primary);
    }

    #[test]
    fn unlocatable_elements_are_skipped() {
        let blank = Element::new("e", "", bounds(1.0));
        assert!(infer_locators(&blank).is_empty());

        let registry = AnchorRegistry::new();
        let elements = vec![
            Element::new("ok", "button", bounds(0.0)).with_id("ok"),
            blank,
        ];
        let created = AnchorFactory::new(&registry)
            .from_elements(&ApplicationId::from("app"), &elements)
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(registry.len(), 1);
        assert!(created[0]
            .locators()
            .all(|(_, locator)| !locator.target.is_blank()));
    }

    #[test]
    fn failed_batch_leaves_registry_untouched() {
        let registry = AnchorRegistry::new();
        let elements = vec![
            Element::new("ok", "button", bounds(0.0)).with_id("ok"),
            Element::new("bad", "button", Bounds::new(f64::NAN, 0.0, 40.0, 20.0)).with_id("bad"),
        ];
        let err = AnchorFactory::new(&registry)
            .from_elements(&ApplicationId::from("app"), &elements)
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(registry.len(), 0);
        assert!(registry.audit_events().is_empty());
    }
}
