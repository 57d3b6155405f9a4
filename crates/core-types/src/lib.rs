//! Shared primitives for the anchor matching engine.
//!
//! Element snapshots handed over by the Element Provider, identifiers and the
//! caller-visible error type live here so every crate agrees on them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Caller-visible error for anchor management.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnchorError {
    /// Anchor definition rejected at create/update time
    #[error("invalid anchor configuration: {0}")]
    Configuration(String),

    /// No anchor registered under this id
    #[error("anchor not found: {0}")]
    NotFound(AnchorId),
}

impl AnchorError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, AnchorError::Configuration(_))
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnchorId(pub String);

impl AnchorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for AnchorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

impl ApplicationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ApplicationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Axis-aligned rectangle in page pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Largest per-axis offset between the two top-left corners.
    pub fn corner_offset(&self, other: &Bounds) -> f64 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

fn default_true() -> bool {
    true
}

/// One element of an Element Provider snapshot.
///
/// `handle` is the provider's opaque identity for the element; the engine
/// never interprets it beyond equality.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub handle: String,
    pub tag: String,
    pub bounds: Bounds,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Element {
    pub fn new(handle: impl Into<String>, tag: impl Into<String>, bounds: Bounds) -> Self {
        Self {
            handle: handle.into(),
            tag: tag.into().to_ascii_lowercase(),
            bounds,
            text: None,
            id: None,
            classes: Vec::new(),
            attributes: BTreeMap::new(),
            role: None,
            visible: true,
            enabled: true,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Attribute lookup that also answers for `id` and `class`.
    pub fn attribute(&self, name: &str) -> Option<String> {
        match name {
            "id" => self.id.clone(),
            "class" if !self.classes.is_empty() => Some(self.classes.join(" ")),
            _ => self.attributes.get(name).cloned(),
        }
    }

    pub fn trimmed_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corner_offset_uses_largest_axis() {
        let a = Bounds::new(10.0, 10.0, 50.0, 20.0);
        let b = Bounds::new(13.0, 4.0, 50.0, 20.0);
        assert_eq!(a.corner_offset(&b), 6.0);
    }

    #[test]
    fn element_attribute_covers_id_and_class() {
        let el = Element::new("n1", "BUTTON", Bounds::default())
            .with_id("submit")
            .with_class("btn")
            .with_class("primary")
            .with_attribute("type", "submit");
        assert_eq!(el.tag, "button");
        assert_eq!(el.attribute("id").as_deref(), Some("submit"));
        assert_eq!(el.attribute("class").as_deref(), Some("btn primary"));
        assert_eq!(el.attribute("type").as_deref(), Some("submit"));
        assert!(el.attribute("name").is_none());
    }

    #[test]
    fn element_defaults_to_visible_and_enabled_when_deserialized() {
        let el: Element = serde_json::from_str(
            r#"{"handle":"h","tag":"a","bounds":{"x":0,"y":0,"width":1,"height":1}}"#,
        )
        .unwrap();
        assert!(el.visible);
        assert!(el.enabled);
        assert!(el.classes.is_empty());
    }

    #[test]
    fn configuration_error_is_flagged() {
        assert!(AnchorError::configuration("bad").is_configuration());
        assert!(!AnchorError::NotFound(AnchorId::new()).is_configuration());
    }
}
