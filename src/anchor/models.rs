//! Anchor value types

use crate::dom::Point;
use serde::{Deserialize, Deserializer, Serialize};

/// Locator sentinel meaning "the document body"
pub const BODY_SELECTOR: &str = "body";

/// Displacement in pixels from a resolved element's top-left corner
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Offset {
    pub x: f64,
    pub y: f64,
}

impl Offset {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Offset of `point` from `origin`
    pub fn between(origin: Point, point: Point) -> Self {
        Self::new(point.x - origin.x, point.y - origin.y)
    }
}

/// Fixed-viewport placement of an overlay's top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(deserialize_with = "deserialize_px")]
    pub left: f64,
    #[serde(deserialize_with = "deserialize_px")]
    pub top: f64,
}

impl Position {
    pub fn new(left: f64, top: f64) -> Self {
        Self { left, top }
    }

    pub fn to_point(self) -> Point {
        Point::new(self.left, self.top)
    }
}

impl From<Point> for Position {
    fn from(p: Point) -> Self {
        Self::new(p.x, p.y)
    }
}

/// A durable, re-resolvable reference to a spot on the page.
///
/// `offset` is relative to whatever element `selector` resolved to when the
/// anchor was last written. `fallback` is only a degraded placement used while
/// the selector resolves to nothing; it is never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorReference {
    #[serde(default = "default_selector")]
    pub selector: String,
    #[serde(default)]
    pub offset: Offset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Position>,
}

fn default_selector() -> String {
    BODY_SELECTOR.to_string()
}

impl AnchorReference {
    pub fn new(selector: impl Into<String>, offset: Offset) -> Self {
        Self {
            selector: selector.into(),
            offset,
            fallback: None,
        }
    }

    /// Anchor relative to the document body
    pub fn body(offset: Offset) -> Self {
        Self::new(BODY_SELECTOR, offset)
    }

    pub fn with_fallback(mut self, fallback: Position) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn is_body(&self) -> bool {
        self.selector.trim() == BODY_SELECTOR
    }
}

impl Default for AnchorReference {
    /// Where a note lands when nothing better is known: 20px into the body
    fn default() -> Self {
        Self::body(Offset::new(20.0, 20.0))
    }
}

/// Parse a CSS pixel length such as `"120px"`, `"12.5"` or `" 8px "`
pub fn parse_px(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let number = trimmed.strip_suffix("px").unwrap_or(trimmed).trim();
    number.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Accepts either a JSON number or a `"NNpx"` string
fn deserialize_px<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Length {
        Number(f64),
        Text(String),
    }

    match Length::deserialize(deserializer)? {
        Length::Number(n) => Ok(n),
        Length::Text(s) => parse_px(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid pixel length {s:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_px() {
        assert_eq!(parse_px("120px"), Some(120.0));
        assert_eq!(parse_px(" 12.5 "), Some(12.5));
        assert_eq!(parse_px("auto"), None);
        assert_eq!(parse_px(""), None);
    }

    #[test]
    fn test_position_accepts_numbers_and_px_strings() {
        let p: Position = serde_json::from_str(r#"{"left": "40px", "top": 12}"#).unwrap();
        assert_eq!(p, Position::new(40.0, 12.0));
        assert!(serde_json::from_str::<Position>(r#"{"left": "auto", "top": 0}"#).is_err());
    }

    #[test]
    fn test_anchor_defaults_when_fields_missing() {
        let anchor: AnchorReference = serde_json::from_str("{}").unwrap();
        assert!(anchor.is_body());
        assert_eq!(anchor.offset, Offset::default());
        assert!(anchor.fallback.is_none());
    }

    #[test]
    fn test_anchor_omits_missing_fallback() {
        let json = serde_json::to_value(AnchorReference::new("#a", Offset::new(1.0, 2.0))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"selector": "#a", "offset": {"x": 1.0, "y": 2.0}})
        );
    }
}
