//! Annotation entities and field-level patches

use crate::anchor::{AnchorReference, Offset, Position};
use crate::dom::Rect;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_NOTE_BG: &str = "#fff740";
pub const DEFAULT_NOTE_TEXT: &str = "#202124";
pub const DEFAULT_NOTE_OPACITY: f64 = 0.95;
pub const DEFAULT_NOTE_BORDER: &str = "rgba(0,0,0,0.1)";
pub const DEFAULT_NOTE_WIDTH: &str = "300px";
pub const DEFAULT_NOTE_HEIGHT: &str = "auto";
pub const DEFAULT_HIGHLIGHT_COLOR: &str = "#fff740";

/// Area highlights at or below this size on either axis are discarded
pub const MIN_AREA_EDGE_PX: f64 = 10.0;

fn default_bg() -> String {
    DEFAULT_NOTE_BG.to_string()
}

fn default_text_color() -> String {
    DEFAULT_NOTE_TEXT.to_string()
}

fn default_opacity() -> f64 {
    DEFAULT_NOTE_OPACITY
}

fn default_border() -> String {
    DEFAULT_NOTE_BORDER.to_string()
}

fn default_width() -> String {
    DEFAULT_NOTE_WIDTH.to_string()
}

fn default_height() -> String {
    DEFAULT_NOTE_HEIGHT.to_string()
}

fn default_highlight_color() -> String {
    DEFAULT_HIGHLIGHT_COLOR.to_string()
}

fn default_true() -> bool {
    true
}

/// Opacity is stored clamped to [0, 1]
fn deserialize_opacity<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    Ok(raw.clamp(0.0, 1.0))
}

/// CSS length: a string as-is, or a bare number taken as pixels
fn deserialize_length<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Length {
        Number(f64),
        Text(String),
    }

    Ok(match Length::deserialize(deserializer)? {
        Length::Number(n) => format!("{n}px"),
        Length::Text(s) => s,
    })
}

// ============================================================================
// Notes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteStyle {
    #[serde(rename = "bg", default = "default_bg")]
    pub background: String,
    #[serde(default = "default_text_color")]
    pub text: String,
    #[serde(default = "default_opacity", deserialize_with = "deserialize_opacity")]
    pub opacity: f64,
    #[serde(default = "default_border")]
    pub border: String,
    /// Named preset the style was picked from, e.g. `"paper"`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
}

impl NoteStyle {
    /// Style given to notes converted from the single-note format
    pub fn legacy() -> Self {
        Self {
            background: "#1e1e2e".into(),
            text: "#cdd6f4".into(),
            opacity: 0.4,
            border: "rgba(255,255,255,0.1)".into(),
            preset: None,
        }
    }

    pub fn apply(&mut self, patch: &StylePatch) {
        if let Some(bg) = &patch.background {
            self.background = bg.clone();
        }
        if let Some(text) = &patch.text {
            self.text = text.clone();
        }
        if let Some(opacity) = patch.opacity {
            self.opacity = opacity.clamp(0.0, 1.0);
        }
        if let Some(border) = &patch.border {
            self.border = border.clone();
        }
        if let Some(preset) = &patch.preset {
            self.preset = Some(preset.clone());
        }
    }
}

impl Default for NoteStyle {
    fn default() -> Self {
        Self {
            background: default_bg(),
            text: default_text_color(),
            opacity: DEFAULT_NOTE_OPACITY,
            border: default_border(),
            preset: None,
        }
    }
}

/// Expanded size; ignored while the note is minimized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteSize {
    #[serde(default = "default_width", deserialize_with = "deserialize_length")]
    pub width: String,
    #[serde(default = "default_height", deserialize_with = "deserialize_length")]
    pub height: String,
}

impl NoteSize {
    pub fn new(width: impl Into<String>, height: impl Into<String>) -> Self {
        Self {
            width: width.into(),
            height: height.into(),
        }
    }
}

impl Default for NoteSize {
    fn default() -> Self {
        Self::new(DEFAULT_NOTE_WIDTH, DEFAULT_NOTE_HEIGHT)
    }
}

/// A sticky note. Only `id` is required in stored data; every other field
/// falls back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub anchor: AnchorReference,
    #[serde(default)]
    pub style: NoteStyle,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub minimized: bool,
    #[serde(default)]
    pub size: NoteSize,
}

impl Note {
    pub fn new(id: impl Into<String>, anchor: AnchorReference) -> Self {
        Self {
            id: id.into(),
            text: String::new(),
            anchor,
            style: NoteStyle::default(),
            visible: true,
            minimized: false,
            size: NoteSize::default(),
        }
    }

    /// Defaults overlaid with `patch`
    pub fn from_patch(id: impl Into<String>, patch: &NotePatch) -> Self {
        let mut note = Self::new(id, AnchorReference::default());
        note.apply(patch);
        note
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_style(mut self, style: NoteStyle) -> Self {
        self.style = style;
        self
    }

    /// Merge a field-level patch; absent fields are left untouched
    pub fn apply(&mut self, patch: &NotePatch) {
        if let Some(text) = &patch.text {
            self.text = text.clone();
        }
        if let Some(anchor) = &patch.anchor {
            anchor.apply_to(&mut self.anchor);
        }
        if let Some(style) = &patch.style {
            self.style.apply(style);
        }
        if let Some(visible) = patch.visible {
            self.visible = visible;
        }
        if let Some(minimized) = patch.minimized {
            self.minimized = minimized;
        }
        if let Some(size) = &patch.size {
            if let Some(width) = &size.width {
                self.size.width = width.clone();
            }
            if let Some(height) = &size.height {
                self.size.height = height.clone();
            }
        }
    }
}

// ============================================================================
// Patches
// ============================================================================

/// Partial note update, as sent by `updateNote` and produced by local edits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<AnchorPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<StylePatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<SizePatch>,
}

impl NotePatch {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn visible(visible: bool) -> Self {
        Self {
            visible: Some(visible),
            ..Self::default()
        }
    }

    pub fn minimized(minimized: bool) -> Self {
        Self {
            minimized: Some(minimized),
            ..Self::default()
        }
    }

    pub fn offset(offset: Offset) -> Self {
        Self {
            anchor: Some(AnchorPatch {
                offset: Some(OffsetPatch {
                    x: Some(offset.x),
                    y: Some(offset.y),
                }),
                ..AnchorPatch::default()
            }),
            ..Self::default()
        }
    }

    pub fn style(style: StylePatch) -> Self {
        Self {
            style: Some(style),
            ..Self::default()
        }
    }

    pub fn size(size: NoteSize) -> Self {
        Self {
            size: Some(SizePatch {
                width: Some(size.width),
                height: Some(size.height),
            }),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn touches_anchor(&self) -> bool {
        self.anchor.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<OffsetPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Position>,
}

impl AnchorPatch {
    pub fn apply_to(&self, anchor: &mut AnchorReference) {
        if let Some(selector) = &self.selector {
            anchor.selector = selector.clone();
        }
        if let Some(offset) = &self.offset {
            if let Some(x) = offset.x {
                anchor.offset.x = x;
            }
            if let Some(y) = offset.y {
                anchor.offset.y = y;
            }
        }
        if let Some(fallback) = self.fallback {
            anchor.fallback = Some(fallback);
        }
    }
}

impl From<&AnchorReference> for AnchorPatch {
    fn from(anchor: &AnchorReference) -> Self {
        Self {
            selector: Some(anchor.selector.clone()),
            offset: Some(OffsetPatch {
                x: Some(anchor.offset.x),
                y: Some(anchor.offset.y),
            }),
            fallback: anchor.fallback,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StylePatch {
    #[serde(rename = "bg", skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
}

impl From<&NoteStyle> for StylePatch {
    fn from(style: &NoteStyle) -> Self {
        Self {
            background: Some(style.background.clone()),
            text: Some(style.text.clone()),
            opacity: Some(style.opacity),
            border: Some(style.border.clone()),
            preset: style.preset.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
}

// ============================================================================
// Highlights
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HighlightKind {
    /// Page-embedded mark around a text selection
    Text { text: String },
    /// Drawn rectangle; `bounds` is the box at creation time
    Area { bounds: Rect },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub id: String,
    #[serde(flatten)]
    pub kind: HighlightKind,
    #[serde(default)]
    pub anchor: AnchorReference,
    #[serde(default = "default_highlight_color")]
    pub color: String,
}

impl Highlight {
    pub fn text(
        id: impl Into<String>,
        text: impl Into<String>,
        anchor: AnchorReference,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: HighlightKind::Text { text: text.into() },
            anchor,
            color: color.into(),
        }
    }

    pub fn area(
        id: impl Into<String>,
        bounds: Rect,
        anchor: AnchorReference,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: HighlightKind::Area { bounds },
            anchor,
            color: color.into(),
        }
    }

    pub fn is_area(&self) -> bool {
        matches!(self.kind, HighlightKind::Area { .. })
    }

    pub fn bounds(&self) -> Option<Rect> {
        match self.kind {
            HighlightKind::Area { bounds } => Some(bounds),
            HighlightKind::Text { .. } => None,
        }
    }
}

// ============================================================================
// Record
// ============================================================================

/// Raw entries that failed validation, kept so they survive a rewrite
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Quarantine {
    pub notes: Vec<Value>,
    pub highlights: Vec<Value>,
    /// A stored `notes` value that was not a list
    pub notes_value: Option<Value>,
    /// A stored `highlights` value that was not a list
    pub highlights_value: Option<Value>,
}

impl Quarantine {
    pub fn len(&self) -> usize {
        self.notes.len()
            + self.highlights.len()
            + usize::from(self.notes_value.is_some())
            + usize::from(self.highlights_value.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn raw_id(value: &Value) -> Option<&str> {
    value.get("id").and_then(Value::as_str)
}

/// Everything persisted for one origin
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub notes: Vec<Note>,
    pub highlights: Vec<Highlight>,
    /// Unknown top-level keys, written back untouched
    pub extra: Map<String, Value>,
    pub quarantine: Quarantine,
}

impl Record {
    pub fn note(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    pub fn note_mut(&mut self, id: &str) -> Option<&mut Note> {
        self.notes.iter_mut().find(|n| n.id == id)
    }

    pub fn highlight(&self, id: &str) -> Option<&Highlight> {
        self.highlights.iter().find(|h| h.id == id)
    }

    /// Insert or replace by id
    pub fn upsert_note(&mut self, note: Note) {
        match self.note_mut(&note.id) {
            Some(existing) => *existing = note,
            None => self.notes.push(note),
        }
    }

    /// Remove a note, including quarantined entries stored under the same id
    pub fn remove_note(&mut self, id: &str) -> bool {
        let before = self.notes.len() + self.quarantine.notes.len();
        self.notes.retain(|n| n.id != id);
        self.quarantine.notes.retain(|raw| raw_id(raw) != Some(id));
        self.notes.len() + self.quarantine.notes.len() != before
    }

    pub fn upsert_highlight(&mut self, highlight: Highlight) {
        match self.highlights.iter_mut().find(|h| h.id == highlight.id) {
            Some(existing) => *existing = highlight,
            None => self.highlights.push(highlight),
        }
    }

    pub fn remove_highlight(&mut self, id: &str) -> bool {
        let before = self.highlights.len() + self.quarantine.highlights.len();
        self.highlights.retain(|h| h.id != id);
        self.quarantine.highlights.retain(|raw| raw_id(raw) != Some(id));
        self.highlights.len() + self.quarantine.highlights.len() != before
    }

    /// Drop every highlight, unreadable ones included
    pub fn clear_highlights(&mut self) {
        self.highlights.clear();
        self.quarantine.highlights.clear();
        self.quarantine.highlights_value = None;
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.highlights.is_empty() && self.quarantine.is_empty()
    }

    /// Serialize for storage. Quarantined entries go back after the valid ones;
    /// a list that was stored as something else is written back as it was
    /// until an entity takes its place.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        let mut map = self.extra.clone();

        let mut notes = Vec::with_capacity(self.notes.len() + self.quarantine.notes.len());
        for note in &self.notes {
            notes.push(serde_json::to_value(note)?);
        }
        notes.extend(self.quarantine.notes.iter().cloned());

        let mut highlights =
            Vec::with_capacity(self.highlights.len() + self.quarantine.highlights.len());
        for highlight in &self.highlights {
            highlights.push(serde_json::to_value(highlight)?);
        }
        highlights.extend(self.quarantine.highlights.iter().cloned());

        map.insert(
            "notes".into(),
            list_or_raw(notes, self.quarantine.notes_value.as_ref()),
        );
        map.insert(
            "highlights".into(),
            list_or_raw(highlights, self.quarantine.highlights_value.as_ref()),
        );
        Ok(Value::Object(map))
    }
}

fn list_or_raw(entries: Vec<Value>, raw: Option<&Value>) -> Value {
    match raw {
        Some(raw) if entries.is_empty() => raw.clone(),
        _ => Value::Array(entries),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_note_defaults_fill_missing_fields() {
        let note: Note = serde_json::from_value(json!({"id": "note-1"})).unwrap();
        assert_eq!(note.text, "");
        assert_eq!(note.anchor, AnchorReference::default());
        assert_eq!(note.style, NoteStyle::default());
        assert!(note.visible);
        assert!(!note.minimized);
        assert_eq!(note.size, NoteSize::new("300px", "auto"));
    }

    #[test]
    fn test_partial_style_keeps_other_defaults() {
        let note: Note = serde_json::from_value(json!({
            "id": "note-1",
            "style": {"bg": "#ffffff", "opacity": 3.5, "type": "paper"}
        }))
        .unwrap();
        assert_eq!(note.style.background, "#ffffff");
        assert_eq!(note.style.text, DEFAULT_NOTE_TEXT);
        assert_eq!(note.style.opacity, 1.0);
        assert_eq!(note.style.preset.as_deref(), Some("paper"));
    }

    #[test]
    fn test_numeric_size_becomes_px() {
        let note: Note =
            serde_json::from_value(json!({"id": "n", "size": {"width": 240, "height": "120px"}}))
                .unwrap();
        assert_eq!(note.size, NoteSize::new("240px", "120px"));
    }

    #[test]
    fn test_patch_merges_nested_fields() {
        let mut note = Note::new("n", AnchorReference::new("#a", Offset::new(1.0, 2.0)));
        let patch: NotePatch = serde_json::from_value(json!({
            "anchor": {"offset": {"y": 50}},
            "style": {"text": "#000000"},
            "size": {"height": "90px"}
        }))
        .unwrap();
        note.apply(&patch);

        assert_eq!(note.anchor.selector, "#a");
        assert_eq!(note.anchor.offset, Offset::new(1.0, 50.0));
        assert_eq!(note.style.text, "#000000");
        assert_eq!(note.style.background, DEFAULT_NOTE_BG);
        assert_eq!(note.size, NoteSize::new("300px", "90px"));
    }

    #[test]
    fn test_highlight_wire_shape() {
        let hl = Highlight::area(
            "hl-1",
            Rect::new(10.0, 20.0, 30.0, 40.0),
            AnchorReference::default(),
            "#ff0000",
        );
        let value = serde_json::to_value(&hl).unwrap();
        assert_eq!(value["type"], "area");
        assert_eq!(value["bounds"]["width"], 30.0);
        let back: Highlight = serde_json::from_value(value).unwrap();
        assert_eq!(back, hl);

        let text: Highlight = serde_json::from_value(json!({
            "id": "hl-2", "type": "text", "text": "quoted"
        }))
        .unwrap();
        assert_eq!(text.kind, HighlightKind::Text { text: "quoted".into() });
        assert_eq!(text.color, DEFAULT_HIGHLIGHT_COLOR);
    }

    #[test]
    fn test_record_value_keeps_extra_and_quarantine() {
        let mut record = Record::default();
        record.extra.insert("theme".into(), json!("dark"));
        record.quarantine.notes.push(json!({"text": "no id"}));
        record.upsert_note(Note::new("n1", AnchorReference::default()));

        let value = record.to_value().unwrap();
        assert_eq!(value["theme"], "dark");
        let notes = value["notes"].as_array().unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0]["id"], "n1");
        assert_eq!(notes[1], json!({"text": "no id"}));
        assert_eq!(value["highlights"], json!([]));
    }

    #[test]
    fn test_non_list_value_written_back_until_replaced() {
        let mut record = Record::default();
        record.quarantine.notes_value = Some(json!({"weird": 1}));
        record.extra.insert("touch".into(), json!(1));

        let value = record.to_value().unwrap();
        assert_eq!(value["notes"], json!({"weird": 1}));
        assert_eq!(value["touch"], 1);

        record.upsert_note(Note::new("n1", AnchorReference::default()));
        let value = record.to_value().unwrap();
        assert_eq!(value["notes"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_drops_quarantined_duplicates() {
        let mut record = Record::default();
        record.upsert_note(Note::new("a", AnchorReference::default()));
        record.quarantine.notes.push(json!({"id": "a", "text": "two"}));
        record.quarantine.notes.push(json!({"id": "b", "visible": "yes"}));
        record.quarantine.highlights.push(json!({"id": "hl-1", "type": "area"}));

        assert!(record.remove_note("a"));
        assert!(record.notes.is_empty());
        assert_eq!(record.quarantine.notes, vec![json!({"id": "b", "visible": "yes"})]);

        // Only a quarantined copy left is still a removal
        assert!(record.remove_highlight("hl-1"));
        assert!(record.quarantine.highlights.is_empty());
        assert!(!record.remove_highlight("hl-1"));
    }
}
