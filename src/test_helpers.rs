//! Test helper factories
//!
//! Page fixtures, in-memory stores and ready-to-use annotation stores with
//! sensible defaults.
#![allow(dead_code)]

use crate::anchor::{AnchorReference, Offset};
use crate::annotations::{AnnotationStore, Highlight, Note, Record};
use crate::dom::{Document, ElementSpec, MemoryDocument, NodeId, Rect};
use crate::overlay::RecordingSurface;
use crate::queue::MutationQueue;
use crate::storage::MemoryRecordStore;
use std::sync::Arc;

pub const ORIGIN: &str = "example.com";

pub type TestStore = AnnotationStore<MemoryDocument, RecordingSurface>;

// ============================================================================
// Page fixtures
// ============================================================================

/// Handles into [`sample_page`]
pub struct SamplePage {
    pub doc: MemoryDocument,
    pub header: NodeId,
    pub card: NodeId,
    pub paragraph: NodeId,
    pub footer: NodeId,
}

/// A small page: a header, a `#card` at (80, 40) holding a paragraph, and a
/// footer below the fold
pub fn sample_page() -> SamplePage {
    let mut doc = MemoryDocument::default();
    let body = doc.body();
    let header = doc.append(
        body,
        ElementSpec::new("header").class("site-header").rect(0.0, 0.0, 1280.0, 30.0),
    );
    let card = doc.append(
        body,
        ElementSpec::new("div").id("card").rect(80.0, 40.0, 400.0, 200.0),
    );
    let paragraph = doc.append(card, ElementSpec::new("p").rect(90.0, 60.0, 380.0, 40.0));
    let footer = doc.append(
        body,
        ElementSpec::new("footer").id("footer").rect(0.0, 2000.0, 1280.0, 100.0),
    );
    SamplePage {
        doc,
        header,
        card,
        paragraph,
        footer,
    }
}

// ============================================================================
// Entity factories
// ============================================================================

pub fn test_note(id: &str, selector: &str, x: f64, y: f64) -> Note {
    Note::new(id, AnchorReference::new(selector, Offset::new(x, y)))
}

pub fn test_area(id: &str, selector: &str, bounds: Rect) -> Highlight {
    Highlight::area(id, bounds, AnchorReference::new(selector, Offset::default()), "#ff0000")
}

pub fn record_of(notes: Vec<Note>, highlights: Vec<Highlight>) -> Record {
    Record {
        notes,
        highlights,
        ..Record::default()
    }
}

// ============================================================================
// Store builders
// ============================================================================

pub fn memory_queue() -> (Arc<MemoryRecordStore>, MutationQueue) {
    let store = Arc::new(MemoryRecordStore::new());
    let queue = MutationQueue::new(store.clone(), ORIGIN);
    (store, queue)
}

/// An annotation store over `doc`, backed by a fresh in-memory record store.
/// Needs a tokio runtime.
pub fn test_store(doc: MemoryDocument) -> (Arc<MemoryRecordStore>, TestStore) {
    let (records, queue) = memory_queue();
    (
        records,
        AnnotationStore::new(doc, RecordingSurface::new(), queue),
    )
}
