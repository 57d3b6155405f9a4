//! Post-match validation rules

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anchor_core_types::Element;
use serde::Serialize;
use tracing::debug;

use crate::types::{ValidationCheck, ValidationRule};

/// Predicate backing a `custom` validation rule.
pub type CustomRule = Arc<dyn Fn(&Element) -> bool + Send + Sync>;

/// Result of one rule against one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub required: bool,
    pub passed: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationVerdict {
    pub outcomes: Vec<RuleOutcome>,
    pub accepted: bool,
}

impl ValidationVerdict {
    pub fn failures(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes.iter().filter(|o| !o.passed)
    }
}

/// Runs an anchor's validation rules against a candidate element.
#[derive(Clone, Default)]
pub struct Validator {
    custom: HashMap<String, CustomRule>,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, rule: CustomRule) {
        self.custom.insert(name.into(), rule);
    }

    pub fn has_custom(&self, name: &str) -> bool {
        self.custom.contains_key(name) || name.starts_with("attr:")
    }

    /// In strict mode every rule must pass, otherwise only required ones.
    pub fn validate(
        &self,
        rules: &[ValidationRule],
        element: &Element,
        strict: bool,
    ) -> ValidationVerdict {
        let outcomes: Vec<RuleOutcome> = rules
            .iter()
            .map(|rule| {
                let passed = self.check(&rule.check, element);
                RuleOutcome {
                    rule: rule_label(&rule.check),
                    required: rule.required,
                    passed,
                    message: (!passed).then(|| rule.error_message.clone()),
                }
            })
            .collect();

        let accepted = outcomes
            .iter()
            .all(|outcome| outcome.passed || (!strict && !outcome.required));

        if !accepted {
            debug!(
                element = %element.handle,
                failed = outcomes.iter().filter(|o| !o.passed).count(),
                strict,
                "candidate vetoed by validation"
            );
        }

        ValidationVerdict { outcomes, accepted }
    }

    fn check(&self, check: &ValidationCheck, element: &Element) -> bool {
        match check {
            ValidationCheck::Exists => true,
            ValidationCheck::Visible => element.visible,
            ValidationCheck::Enabled => element.enabled,
            ValidationCheck::ContainsText(needle) => element
                .text
                .as_deref()
                .map(|text| text.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
            ValidationCheck::Custom(name) => self.check_custom(name, element),
        }
    }

    fn check_custom(&self, name: &str, element: &Element) -> bool {
        if let Some(rule) = self.custom.get(name) {
            return rule(element);
        }
        if let Some(spec) = name.strip_prefix("attr:") {
            return match spec.split_once('=') {
                Some((attr, value)) => element.attribute(attr.trim()).as_deref() == Some(value),
                None => element.attribute(spec.trim()).is_some(),
            };
        }
        debug!(predicate = name, "unknown custom validation predicate");
        false
    }
}

fn rule_label(check: &ValidationCheck) -> String {
    match check {
        ValidationCheck::ContainsText(text) => format!("contains_text:{}", text),
        ValidationCheck::Custom(name) => format!("custom:{}", name),
        other => other.name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_core_types::Bounds;

    fn element() -> Element {
        Element::new("n", "input", Bounds::default())
            .with_text("Email address")
            .with_attribute("type", "email")
            .disabled()
    }

    #[test]
    fn default_mode_only_vetoes_on_required_rules() {
        let rules = vec![
            ValidationRule::required(ValidationCheck::Visible),
            ValidationRule::optional(ValidationCheck::Enabled),
        ];
        let verdict = Validator::new().validate(&rules, &element(), false);
        assert!(verdict.accepted);
        assert_eq!(verdict.failures().count(), 1);

        let verdict = Validator::new().validate(&rules, &element(), true);
        assert!(!verdict.accepted);
    }

    #[test]
    fn required_failure_vetoes_in_every_mode() {
        let rules = vec![ValidationRule::required(ValidationCheck::Enabled)];
        assert!(!Validator::new().validate(&rules, &element(), false).accepted);
        assert!(!Validator::new().validate(&rules, &element(), true).accepted);
    }

    #[test]
    fn contains_text_ignores_case() {
        let rules = vec![ValidationRule::required(ValidationCheck::ContainsText(
            "EMAIL".into(),
        ))];
        let verdict = Validator::new().validate(&rules, &element(), true);
        assert!(verdict.accepted);
        assert_eq!(verdict.outcomes[0].rule, "contains_text:EMAIL");
        assert!(verdict.outcomes[0].message.is_none());
    }

    #[test]
    fn custom_rules_resolve_registered_and_builtin_predicates() {
        let mut validator = Validator::new();
        validator.register("is_input", Arc::new(|el: &Element| el.tag == "input"));

        let rules = vec![
            ValidationRule::required(ValidationCheck::Custom("is_input".into())),
            ValidationRule::required(ValidationCheck::Custom("attr:type=email".into())),
            ValidationRule::required(ValidationCheck::Custom("attr:type".into())),
        ];
        assert!(validator.validate(&rules, &element(), true).accepted);

        let unknown = vec![ValidationRule::required(ValidationCheck::Custom(
            "never_registered".into(),
        ))];
        let verdict = validator.validate(&unknown, &element(), false);
        assert!(!verdict.accepted);
        assert_eq!(
            verdict.outcomes[0].message.as_deref(),
            Some("custom check 'never_registered' failed")
        );
    }

    #[test]
    fn no_rules_always_accepts() {
        assert!(Validator::new().validate(&[], &element(), true).accepted);
    }
}
