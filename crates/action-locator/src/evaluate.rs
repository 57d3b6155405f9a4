//! Per-kind locator evaluation against an element snapshot

use anchor_core_types::{Bounds, Element};
use tracing::trace;

use crate::errors::LocatorError;
use crate::selectors::{parse_css, parse_xpath, SelectorList, XPathQuery};
use crate::types::{Locator, LocatorKind, LocatorTarget, Tolerance};

/// Attribute carrying a provider-computed visual signature (hex).
pub const VISUAL_SIGNATURE_ATTR: &str = "visual_signature";

/// Anchor context a locator is evaluated under.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub tolerance: &'a Tolerance,
    pub expected_bounds: Option<&'a Bounds>,
}

/// Finds the candidate a locator designates.
///
/// Integrators with a richer view of the document (real CSS engine, image
/// matching) plug their own implementation into the engine.
pub trait LocatorEvaluator: Send + Sync {
    fn locate<'e>(
        &self,
        locator: &Locator,
        ctx: &EvalContext<'_>,
        candidates: &'e [Element],
    ) -> Result<Option<&'e Element>, LocatorError>;
}

/// Evaluator answering every kind from snapshot fields alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLocatorEvaluator;

enum Compiled<'l> {
    Css(SelectorList),
    Xpath(XPathQuery),
    Id(&'l str),
    Text(String),
    Point { x: f64, y: f64 },
    Visual(Vec<u8>),
    Attribute(&'l str, Option<&'l str>),
}

impl<'l> Compiled<'l> {
    fn compile(target: &'l LocatorTarget) -> Result<Self, LocatorError> {
        if target.is_blank() {
            return Err(LocatorError::InvalidPayload(format!(
                "empty {} locator",
                target.kind()
            )));
        }
        Ok(match target {
            LocatorTarget::CssSelector(selector) => Compiled::Css(parse_css(selector)?),
            LocatorTarget::Xpath(path) => Compiled::Xpath(parse_xpath(path)?),
            LocatorTarget::ElementId(id) => Compiled::Id(id.as_str()),
            LocatorTarget::ElementText(text) => Compiled::Text(normalize_text(text)),
            LocatorTarget::Position { x, y } => Compiled::Point { x: *x, y: *y },
            LocatorTarget::VisualPattern(pattern) => Compiled::Visual(decode_signature(pattern)
                .ok_or_else(|| {
                    LocatorError::fault(
                        LocatorKind::VisualPattern,
                        format!("pattern '{}' is not a hex signature", pattern),
                    )
                })?),
            LocatorTarget::Attribute { name, value } => {
                Compiled::Attribute(name.as_str(), value.as_deref())
            }
        })
    }

    fn matches(&self, element: &Element, tolerance: &Tolerance) -> bool {
        match self {
            Compiled::Css(selector) => selector.matches(element),
            Compiled::Xpath(query) => query.matches(element),
            Compiled::Id(id) => element.id.as_deref() == Some(*id),
            Compiled::Text(expected) => element
                .trimmed_text()
                .map(|actual| {
                    levenshtein(&normalize_text(actual), expected) <= tolerance.text as usize
                })
                .unwrap_or(false),
            Compiled::Point { x, y } => {
                let offset = (element.bounds.x - x).abs().max((element.bounds.y - y).abs());
                offset <= tolerance.position
            }
            Compiled::Visual(pattern) => element
                .attributes
                .get(VISUAL_SIGNATURE_ATTR)
                .and_then(|raw| decode_signature(raw))
                .map(|signature| visual_similarity(pattern, &signature) >= tolerance.visual)
                .unwrap_or(false),
            Compiled::Attribute(name, expected) => match (element.attribute(name), expected) {
                (Some(actual), Some(expected)) => actual == *expected,
                (Some(_), None) => true,
                (None, _) => false,
            },
        }
    }

    /// Where the candidate is expected to be, for picking among several hits.
    fn reference_point(&self, ctx: &EvalContext<'_>) -> Option<(f64, f64)> {
        match self {
            Compiled::Point { x, y } => Some((*x, *y)),
            _ => ctx.expected_bounds.map(|b| (b.x, b.y)),
        }
    }
}

impl LocatorEvaluator for DefaultLocatorEvaluator {
    fn locate<'e>(
        &self,
        locator: &Locator,
        ctx: &EvalContext<'_>,
        candidates: &'e [Element],
    ) -> Result<Option<&'e Element>, LocatorError> {
        let compiled = Compiled::compile(&locator.target)?;
        let reference = compiled.reference_point(ctx);

        let mut best: Option<(&'e Element, f64)> = None;
        for element in candidates {
            if !compiled.matches(element, ctx.tolerance) {
                continue;
            }
            let distance = reference
                .map(|(x, y)| (element.bounds.x - x).abs().max((element.bounds.y - y).abs()))
                .unwrap_or(0.0);
            // strict comparison keeps the earliest element on ties
            match best {
                Some((_, current)) if distance >= current => {}
                _ => best = Some((element, distance)),
            }
        }

        if let Some((element, distance)) = best {
            trace!(
                locator = %locator.target,
                element = %element.handle,
                distance,
                "locator hit"
            );
        }
        Ok(best.map(|(element, _)| element))
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Simple Levenshtein distance
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0usize; b_chars.len() + 1];
    for (i, ca) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

fn decode_signature(raw: &str) -> Option<Vec<u8>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.len() % 2 != 0 {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|idx| raw.get(idx..idx + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

/// Share of equal bits; signatures of different length never match.
pub fn visual_similarity(a: &[u8], b: &[u8]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let differing: u32 = a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum();
    1.0 - differing as f64 / (a.len() * 8) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(tolerance: &'a Tolerance, expected: Option<&'a Bounds>) -> EvalContext<'a> {
        EvalContext {
            tolerance,
            expected_bounds: expected,
        }
    }

    fn snapshot() -> Vec<Element> {
        vec![
            Element::new("a", "button", Bounds::new(10.0, 10.0, 80.0, 20.0))
                .with_id("cancel")
                .with_text("Cancel"),
            Element::new("b", "button", Bounds::new(100.0, 10.0, 80.0, 20.0))
                .with_id("submit")
                .with_class("btn")
                .with_text("Submit order")
                .with_attribute(VISUAL_SIGNATURE_ATTR, "ff00ff00"),
            Element::new("c", "button", Bounds::new(300.0, 10.0, 80.0, 20.0))
                .with_class("btn")
                .with_text("Submit  Order "),
        ]
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("submit", "submit"), 0);
    }

    #[test]
    fn element_id_hits_exact_id() {
        let tol = Tolerance::default();
        let elements = snapshot();
        let hit = DefaultLocatorEvaluator
            .locate(&Locator::element_id("submit"), &ctx(&tol, None), &elements)
            .unwrap();
        assert_eq!(hit.map(|e| e.handle.as_str()), Some("b"));
    }

    #[test]
    fn text_match_is_fuzzy_and_prefers_expected_position() {
        let tol = Tolerance::default();
        let elements = snapshot();
        let expected = Bounds::new(290.0, 10.0, 80.0, 20.0);
        let hit = DefaultLocatorEvaluator
            .locate(&Locator::text("submit ordr"), &ctx(&tol, Some(&expected)), &elements)
            .unwrap();
        assert_eq!(hit.map(|e| e.handle.as_str()), Some("c"));

        let hit = DefaultLocatorEvaluator
            .locate(&Locator::text("submit ordr"), &ctx(&tol, None), &elements)
            .unwrap();
        assert_eq!(hit.map(|e| e.handle.as_str()), Some("b"));
    }

    #[test]
    fn position_locator_respects_tolerance() {
        let tol = Tolerance::default();
        let elements = snapshot();
        let hit = DefaultLocatorEvaluator
            .locate(&Locator::position(104.0, 6.0), &ctx(&tol, None), &elements)
            .unwrap();
        assert_eq!(hit.map(|e| e.handle.as_str()), Some("b"));

        let miss = DefaultLocatorEvaluator
            .locate(&Locator::position(150.0, 10.0), &ctx(&tol, None), &elements)
            .unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn visual_pattern_uses_similarity_threshold() {
        let tol = Tolerance::default();
        let elements = snapshot();
        // one differing bit of 32
        let hit = DefaultLocatorEvaluator
            .locate(&Locator::visual("ff00ff01"), &ctx(&tol, None), &elements)
            .unwrap();
        assert_eq!(hit.map(|e| e.handle.as_str()), Some("b"));

        let miss = DefaultLocatorEvaluator
            .locate(&Locator::visual("00ff00ff"), &ctx(&tol, None), &elements)
            .unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn malformed_payloads_are_faults() {
        let tol = Tolerance::default();
        let elements = snapshot();
        for locator in [
            Locator::visual("xyz"),
            Locator::css("div > button"),
            Locator::element_id(""),
            Locator::xpath("button"),
        ] {
            assert!(DefaultLocatorEvaluator
                .locate(&locator, &ctx(&tol, None), &elements)
                .is_err());
        }
    }

    #[test]
    fn attribute_presence_and_equality() {
        let tol = Tolerance::default();
        let elements = snapshot();
        let hit = DefaultLocatorEvaluator
            .locate(
                &Locator::attribute("class", Some("btn".into())),
                &ctx(&tol, None),
                &elements,
            )
            .unwrap();
        assert_eq!(hit.map(|e| e.handle.as_str()), Some("b"));

        let hit = DefaultLocatorEvaluator
            .locate(
                &Locator::attribute(VISUAL_SIGNATURE_ATTR, None),
                &ctx(&tol, None),
                &elements,
            )
            .unwrap();
        assert_eq!(hit.map(|e| e.handle.as_str()), Some("b"));
    }

    #[test]
    fn similarity_of_mismatched_lengths_is_zero() {
        assert_eq!(visual_similarity(&[0xff], &[0xff, 0x00]), 0.0);
        assert_eq!(visual_similarity(&[0xff], &[0xff]), 1.0);
    }
}
