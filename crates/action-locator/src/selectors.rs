//! Selector parsing for the CSS and XPath locator kinds
//!
//! Only the flat subset that can be answered from an element snapshot is
//! supported. Anything relational (combinators, axes, pseudo-classes) is
//! reported as an evaluation fault rather than silently mismatching.

use anchor_core_types::Element;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::LocatorError;
use crate::types::LocatorKind;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompoundSelector {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attributes: Vec<AttributeTest>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeTest {
    Present(String),
    Equals(String, String),
    Contains(String, String),
}

impl AttributeTest {
    fn matches(&self, element: &Element) -> bool {
        match self {
            AttributeTest::Present(name) => element.attribute(name).is_some(),
            AttributeTest::Equals(name, value) => {
                element.attribute(name).as_deref() == Some(value.as_str())
            }
            AttributeTest::Contains(name, value) => element
                .attribute(name)
                .map(|actual| actual.contains(value.as_str()))
                .unwrap_or(false),
        }
    }
}

impl CompoundSelector {
    pub fn matches(&self, element: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if tag != "*" && !tag.eq_ignore_ascii_case(&element.tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if element.id.as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        self.classes.iter().all(|class| element.has_class(class))
            && self.attributes.iter().all(|test| test.matches(element))
    }
}

/// Comma separated list of compound selectors; matches if any member does.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorList(pub Vec<CompoundSelector>);

impl SelectorList {
    pub fn matches(&self, element: &Element) -> bool {
        self.0.iter().any(|selector| selector.matches(element))
    }
}

fn css_fault(reason: impl Into<String>) -> LocatorError {
    LocatorError::fault(LocatorKind::CssSelector, reason)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn read_ident(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < chars.len() && is_ident_char(chars[*pos]) {
        *pos += 1;
    }
    chars[start..*pos].iter().collect()
}

pub fn parse_css(input: &str) -> Result<SelectorList, LocatorError> {
    let mut selectors = Vec::new();
    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(css_fault("empty selector in list"));
        }
        selectors.push(parse_compound(part)?);
    }
    Ok(SelectorList(selectors))
}

fn parse_compound(input: &str) -> Result<CompoundSelector, LocatorError> {
    let chars: Vec<char> = input.chars().collect();
    let mut pos = 0;
    let mut selector = CompoundSelector::default();

    if chars[0] == '*' {
        selector.tag = Some("*".to_string());
        pos = 1;
    } else if is_ident_char(chars[0]) {
        selector.tag = Some(read_ident(&chars, &mut pos).to_ascii_lowercase());
    }

    while pos < chars.len() {
        match chars[pos] {
            '#' => {
                pos += 1;
                let ident = read_ident(&chars, &mut pos);
                if ident.is_empty() {
                    return Err(css_fault(format!("empty id in '{}'", input)));
                }
                selector.id = Some(ident);
            }
            '.' => {
                pos += 1;
                let ident = read_ident(&chars, &mut pos);
                if ident.is_empty() {
                    return Err(css_fault(format!("empty class in '{}'", input)));
                }
                selector.classes.push(ident);
            }
            '[' => {
                let close = chars[pos..]
                    .iter()
                    .position(|c| *c == ']')
                    .map(|offset| pos + offset)
                    .ok_or_else(|| css_fault(format!("unterminated attribute in '{}'", input)))?;
                let body: String = chars[pos + 1..close].iter().collect();
                selector.attributes.push(parse_attribute_test(&body)?);
                pos = close + 1;
            }
            c if c.is_whitespace() || matches!(c, '>' | '+' | '~') => {
                return Err(css_fault(format!("combinators are not supported: '{}'", input)));
            }
            ':' => {
                return Err(css_fault(format!(
                    "pseudo-classes are not supported: '{}'",
                    input
                )));
            }
            other => {
                return Err(css_fault(format!(
                    "unexpected '{}' in selector '{}'",
                    other, input
                )));
            }
        }
    }

    Ok(selector)
}

fn unquote(raw: &str) -> &str {
    let raw = raw.trim();
    if raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\'')))
    {
        &raw[1..raw.len() - 1]
    } else {
        raw
    }
}

fn parse_attribute_test(body: &str) -> Result<AttributeTest, LocatorError> {
    let body = body.trim();
    if let Some((name, value)) = body.split_once("*=") {
        return attribute_name(name).map(|n| AttributeTest::Contains(n, unquote(value).into()));
    }
    if let Some((name, value)) = body.split_once('=') {
        if name.ends_with(['^', '$', '|', '~']) {
            return Err(css_fault(format!("unsupported attribute operator in [{}]", body)));
        }
        return attribute_name(name).map(|n| AttributeTest::Equals(n, unquote(value).into()));
    }
    attribute_name(body).map(AttributeTest::Present)
}

fn attribute_name(raw: &str) -> Result<String, LocatorError> {
    let name = raw.trim();
    if name.is_empty() || !name.chars().all(is_ident_char) {
        return Err(css_fault(format!("invalid attribute name '{}'", name)));
    }
    Ok(name.to_string())
}

static XPATH_STEP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^//(\*|[A-Za-z][\w-]*)(.*)$").expect("static regex"));

static XPATH_PREDICATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\[\s*(?:(contains)\(\s*)?(@[\w-]+|text\(\))\s*(?:(?:=|,)\s*(?:'([^']*)'|"([^"]*)"))?\s*\)?\s*\]"#,
    )
    .expect("static regex")
});

/// Single-step XPath with attribute/text predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct XPathQuery {
    pub tag: String,
    pub predicates: Vec<XPathPredicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum XPathPredicate {
    Attribute(AttributeTest),
    TextEquals(String),
    TextContains(String),
}

impl XPathQuery {
    pub fn matches(&self, element: &Element) -> bool {
        if self.tag != "*" && !self.tag.eq_ignore_ascii_case(&element.tag) {
            return false;
        }
        self.predicates.iter().all(|predicate| match predicate {
            XPathPredicate::Attribute(test) => test.matches(element),
            XPathPredicate::TextEquals(text) => element.trimmed_text() == Some(text.as_str()),
            XPathPredicate::TextContains(text) => element
                .text
                .as_deref()
                .map(|t| t.contains(text.as_str()))
                .unwrap_or(false),
        })
    }
}

fn xpath_fault(reason: impl Into<String>) -> LocatorError {
    LocatorError::fault(LocatorKind::Xpath, reason)
}

pub fn parse_xpath(input: &str) -> Result<XPathQuery, LocatorError> {
    let input = input.trim();
    let captures = XPATH_STEP
        .captures(input)
        .ok_or_else(|| xpath_fault(format!("unsupported xpath '{}'", input)))?;
    let tag = captures[1].to_ascii_lowercase();
    let mut rest = captures.get(2).map(|m| m.as_str()).unwrap_or("").trim();
    let mut predicates = Vec::new();

    while !rest.is_empty() {
        let caps = XPATH_PREDICATE
            .captures(rest)
            .ok_or_else(|| xpath_fault(format!("unsupported xpath predicate '{}'", rest)))?;
        let contains = caps.get(1).is_some();
        let subject = &caps[2];
        let literal = caps
            .get(3)
            .or_else(|| caps.get(4))
            .map(|m| m.as_str().to_string());
        let predicate = match (subject, literal, contains) {
            ("text()", Some(text), false) => XPathPredicate::TextEquals(text),
            ("text()", Some(text), true) => XPathPredicate::TextContains(text),
            ("text()", None, _) => {
                return Err(xpath_fault("text() predicate needs a literal"));
            }
            (attr, None, false) => {
                XPathPredicate::Attribute(AttributeTest::Present(attr[1..].to_string()))
            }
            (attr, Some(value), false) => {
                XPathPredicate::Attribute(AttributeTest::Equals(attr[1..].to_string(), value))
            }
            (attr, Some(value), true) => {
                XPathPredicate::Attribute(AttributeTest::Contains(attr[1..].to_string(), value))
            }
            (_, None, true) => return Err(xpath_fault("contains() needs a literal")),
        };
        predicates.push(predicate);
        rest = rest[caps[0].len()..].trim_start();
    }

    Ok(XPathQuery { tag, predicates })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_core_types::Bounds;

    fn button() -> Element {
        Element::new("n1", "button", Bounds::new(0.0, 0.0, 80.0, 24.0))
            .with_id("submit")
            .with_class("btn")
            .with_class("primary")
            .with_attribute("data-test", "submit-order")
            .with_text("  Place order ")
    }

    #[test]
    fn compound_css_matches_all_parts() {
        let selector = parse_css("button#submit.btn.primary[data-test=\"submit-order\"]").unwrap();
        assert!(selector.matches(&button()));

        let selector = parse_css("button.secondary").unwrap();
        assert!(!selector.matches(&button()));
    }

    #[test]
    fn selector_list_matches_any_member() {
        let selector = parse_css("a.nav, [data-test*=order]").unwrap();
        assert_eq!(selector.0.len(), 2);
        assert!(selector.matches(&button()));
    }

    #[test]
    fn css_combinators_are_faults() {
        assert!(parse_css("form > button").is_err());
        assert!(parse_css("div button").is_err());
        assert!(parse_css("button:hover").is_err());
        assert!(parse_css("[data-x^=a]").is_err());
        assert!(parse_css("button[").is_err());
        assert!(parse_css("a,,b").is_err());
    }

    #[test]
    fn xpath_with_attribute_and_text() {
        let query = parse_xpath("//button[@id='submit'][text()=\"Place order\"]").unwrap();
        assert_eq!(query.tag, "button");
        assert_eq!(query.predicates.len(), 2);
        assert!(query.matches(&button()));
    }

    #[test]
    fn xpath_contains_and_wildcard() {
        let query = parse_xpath("//*[contains(text(), 'order')][@data-test]").unwrap();
        assert!(query.matches(&button()));

        let query = parse_xpath("//a[@id='submit']").unwrap();
        assert!(!query.matches(&button()));
    }

    #[test]
    fn xpath_axes_are_faults() {
        assert!(parse_xpath("/html/body/button").is_err());
        assert!(parse_xpath("//div/button").is_err());
        assert!(parse_xpath("//button[position()=1]").is_err());
    }
}
