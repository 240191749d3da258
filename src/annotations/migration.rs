//! Parsing stored records: validation, quarantine and legacy conversion
//!
//! Stored data comes from other contexts and older versions, so nothing here
//! fails. A bad entity is skipped and quarantined; a record in the old
//! single-note shape (`{text, position, style, visible, minimized, size}`
//! without `notes`) is converted to a one-note record.

use super::models::{Highlight, Note, NoteSize, NoteStyle, Record};
use crate::anchor::{parse_px, AnchorReference, Offset, Position};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

/// Keys that belong to the single-note format
const LEGACY_KEYS: &[&str] = &["text", "position", "style", "visible", "minimized", "size"];

/// Default legacy placement when no position was stored
const LEGACY_DEFAULT_PX: f64 = 20.0;

/// Result of parsing a stored value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordLoad {
    pub record: Record,
    /// The stored value was in the legacy format and has been converted
    pub migrated: bool,
    /// Entities dropped from the projection (quarantined or unreadable)
    pub skipped: usize,
}

impl Record {
    /// Parse whatever is stored for an origin. `None` is an empty record.
    pub fn from_stored(value: Option<Value>) -> RecordLoad {
        let mut map = match value {
            None | Some(Value::Null) => return RecordLoad::default(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                warn!(found = %other, "Stored record is not an object, starting empty");
                return RecordLoad {
                    skipped: 1,
                    ..RecordLoad::default()
                };
            }
        };

        let mut load = RecordLoad::default();

        if is_legacy(&map) {
            let legacy: Map<String, Value> = LEGACY_KEYS
                .iter()
                .filter_map(|k| map.remove(*k).map(|v| (k.to_string(), v)))
                .collect();
            if let Some(note) = convert_legacy(&legacy) {
                info!(note_id = %note.id, "Converted legacy single-note record");
                load.record.notes.push(note);
            }
            load.migrated = true;
        } else {
            let parsed = parse_list(map.remove("notes"), "notes", &mut load.record.notes);
            load.skipped += parsed.skipped();
            load.record.quarantine.notes = parsed.rejected;
            load.record.quarantine.notes_value = parsed.not_a_list;
        }

        let parsed = parse_list(
            map.remove("highlights"),
            "highlights",
            &mut load.record.highlights,
        );
        load.skipped += parsed.skipped();
        load.record.quarantine.highlights = parsed.rejected;
        load.record.quarantine.highlights_value = parsed.not_a_list;

        load.record.extra = map;
        load
    }
}

/// Legacy detection: `text` present and `notes` absent
pub fn is_legacy(map: &Map<String, Value>) -> bool {
    map.contains_key("text") && !map.contains_key("notes")
}

/// Deterministic id for a converted legacy note, so every context that
/// converts the same value arrives at the same id
pub fn legacy_note_id(legacy: &Map<String, Value>) -> String {
    let bytes = serde_json::to_vec(legacy).unwrap_or_default();
    format!("note-{}", Uuid::new_v5(&Uuid::NAMESPACE_OID, &bytes))
}

fn convert_legacy(legacy: &Map<String, Value>) -> Option<Note> {
    let text = legacy.get("text").and_then(Value::as_str).unwrap_or("");
    if text.trim().is_empty() {
        return None;
    }

    let anchor = match legacy.get("position").and_then(Value::as_object) {
        Some(position) => {
            let left = px_field(position, "left")
                .or_else(|| px_field(position, "right"))
                .unwrap_or(LEGACY_DEFAULT_PX);
            let top = px_field(position, "top").unwrap_or(LEGACY_DEFAULT_PX);
            AnchorReference::body(Offset::default()).with_fallback(Position::new(left, top))
        }
        None => AnchorReference::default(),
    };

    let style = legacy
        .get("style")
        .and_then(|s| serde_json::from_value::<NoteStyle>(s.clone()).ok())
        .unwrap_or_else(NoteStyle::legacy);
    let size = legacy
        .get("size")
        .and_then(|s| serde_json::from_value::<NoteSize>(s.clone()).ok())
        .unwrap_or_default();

    let mut note = Note::new(legacy_note_id(legacy), anchor)
        .with_text(text)
        .with_style(style);
    note.visible = legacy.get("visible").and_then(Value::as_bool) != Some(false);
    note.minimized = legacy
        .get("minimized")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    note.size = size;
    Some(note)
}

fn px_field(map: &Map<String, Value>, key: &str) -> Option<f64> {
    match map.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_px(s),
        _ => None,
    }
}

/// Entities addressable by id
trait Identified {
    fn entity_id(&self) -> &str;
}

impl Identified for Note {
    fn entity_id(&self) -> &str {
        &self.id
    }
}

impl Identified for Highlight {
    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// What `parse_list` could not accept
#[derive(Default)]
struct ParsedList {
    rejected: Vec<Value>,
    not_a_list: Option<Value>,
}

impl ParsedList {
    fn skipped(&self) -> usize {
        self.rejected.len() + usize::from(self.not_a_list.is_some())
    }
}

/// Parse one entity list into `out`, returning whatever was not accepted
fn parse_list<T>(raw: Option<Value>, field: &str, out: &mut Vec<T>) -> ParsedList
where
    T: serde::de::DeserializeOwned + Identified,
{
    let entries = match raw {
        None | Some(Value::Null) => return ParsedList::default(),
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            warn!(field, found = %other, "Expected a list, keeping the stored value");
            return ParsedList {
                rejected: Vec::new(),
                not_a_list: Some(other),
            };
        }
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut rejected = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<T>(entry.clone()) {
            Ok(parsed) => {
                let id = parsed.entity_id();
                if id.trim().is_empty() {
                    warn!(field, index, "Skipping entity with empty id");
                    rejected.push(entry);
                } else if !seen.insert(id.to_string()) {
                    warn!(field, index, id, "Skipping entity with duplicate id");
                    rejected.push(entry);
                } else {
                    out.push(parsed);
                }
            }
            Err(e) => {
                warn!(field, index, error = %e, "Skipping malformed entity");
                rejected.push(entry);
            }
        }
    }
    ParsedList {
        rejected,
        not_a_list: None,
    }
}
