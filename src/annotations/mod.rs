//! Notes, highlights and their per-origin record
//!
//! - [`models`]: entity types, patches and the [`Record`]
//! - [`migration`]: tolerant parsing of stored values, legacy conversion
//! - [`placement`]: the "click to place a note" state machine
//! - [`store`]: [`AnnotationStore`], the live projection for one page

pub mod migration;
pub mod models;
pub mod placement;
pub mod store;

pub use migration::{is_legacy, legacy_note_id, RecordLoad};
pub use models::{
    AnchorPatch, Highlight, HighlightKind, Note, NotePatch, NoteSize, NoteStyle, OffsetPatch,
    Quarantine, Record, SizePatch, StylePatch, DEFAULT_HIGHLIGHT_COLOR, MIN_AREA_EDGE_PX,
};
pub use placement::{ClickOutcome, Placement};
pub use store::{
    new_highlight_id, new_note_id, AnnotationStore, ReconcileReport, HIGHLIGHT_ID_ATTR,
};
