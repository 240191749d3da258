//! The per-context projection of an origin's annotations
//!
//! `AnnotationStore` owns, for every tracked entity, its mounted overlay, its
//! resolved target and visibility watch, and the last value it rendered. The
//! persisted [`Record`] is the source of truth: local edits are applied
//! optimistically and then persisted through the [`MutationQueue`]; the change
//! notification that follows is reconciled like any other.

use super::models::{
    Highlight, HighlightKind, Note, NotePatch, NoteSize, Record, StylePatch, MIN_AREA_EDGE_PX,
};
use super::placement::{ClickOutcome, Placement};
use crate::anchor::{AnchorResolver, Offset};
use crate::dom::{descendants, Document, NodeId, Point, Rect};
use crate::overlay::{Cursor, OverlayHandle, OverlayKind, OverlaySurface};
use crate::queue::{MutationHandle, MutationQueue, PersistenceError};
use crate::reconcile::{PassReport, PositionReconciler, TrackedOverlay, Trigger, VisibilityGate};
use crate::storage::RecordChange;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Attribute carried by page-embedded text-highlight marks
pub const HIGHLIGHT_ID_ATTR: &str = "data-highlight-id";

/// What a reconciliation did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl ReconcileReport {
    /// True when nothing was mounted, touched or torn down
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.removed == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug)]
struct TrackedNote {
    note: Note,
    overlay: TrackedOverlay,
}

#[derive(Debug)]
enum Projection {
    Area(TrackedOverlay),
    /// Marks found in the page; empty means the highlight is orphaned
    Text { marks: Vec<NodeId> },
}

#[derive(Debug)]
struct TrackedHighlight {
    highlight: Highlight,
    projection: Projection,
}

pub fn new_note_id() -> String {
    format!("note-{}", Uuid::new_v4())
}

pub fn new_highlight_id() -> String {
    format!("hl-{}", Uuid::new_v4())
}

pub struct AnnotationStore<D: Document, S: OverlaySurface> {
    document: D,
    surface: S,
    queue: MutationQueue,
    reconciler: PositionReconciler,
    gate: VisibilityGate,
    notes: BTreeMap<String, TrackedNote>,
    /// Invisible notes: known but not tracked
    hidden: BTreeMap<String, Note>,
    highlights: BTreeMap<String, TrackedHighlight>,
    placement: Placement,
}

impl<D: Document, S: OverlaySurface> AnnotationStore<D, S> {
    pub fn new(document: D, surface: S, queue: MutationQueue) -> Self {
        Self {
            document,
            surface,
            queue,
            reconciler: PositionReconciler::new(),
            gate: VisibilityGate::default(),
            notes: BTreeMap::new(),
            hidden: BTreeMap::new(),
            highlights: BTreeMap::new(),
            placement: Placement::default(),
        }
    }

    pub fn with_visibility_margin(mut self, margin: f64) -> Self {
        self.gate = VisibilityGate::new(margin);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn origin(&self) -> &str {
        self.queue.origin()
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    /// Mutable page access. Follow structural edits with
    /// `schedule(Trigger::Structural)`.
    pub fn document_mut(&mut self) -> &mut D {
        &mut self.document
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn gate(&self) -> &VisibilityGate {
        &self.gate
    }

    pub fn reconciler(&self) -> &PositionReconciler {
        &self.reconciler
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    /// A tracked (visible) note
    pub fn note(&self, id: &str) -> Option<&Note> {
        self.notes.get(id).map(|t| &t.note)
    }

    /// A known note, tracked or hidden
    pub fn known_note(&self, id: &str) -> Option<&Note> {
        self.note(id).or_else(|| self.hidden.get(id))
    }

    pub fn highlight(&self, id: &str) -> Option<&Highlight> {
        self.highlights.get(id).map(|t| &t.highlight)
    }

    pub fn tracked_note_ids(&self) -> Vec<String> {
        self.notes.keys().cloned().collect()
    }

    pub fn tracked_highlight_ids(&self) -> Vec<String> {
        self.highlights.keys().cloned().collect()
    }

    pub fn is_tracked(&self, id: &str) -> bool {
        self.notes.contains_key(id) || self.highlights.contains_key(id)
    }

    pub fn overlay_handle(&self, id: &str) -> Option<OverlayHandle> {
        if let Some(t) = self.notes.get(id) {
            return Some(t.overlay.handle);
        }
        match self.highlights.get(id).map(|t| &t.projection) {
            Some(Projection::Area(overlay)) => Some(overlay.handle),
            _ => None,
        }
    }

    /// Element the entity's anchor resolved to on the last resolution
    pub fn target_of(&self, id: &str) -> Option<NodeId> {
        if let Some(t) = self.notes.get(id) {
            return t.overlay.target;
        }
        match self.highlights.get(id).map(|t| &t.projection) {
            Some(Projection::Area(overlay)) => overlay.target,
            _ => None,
        }
    }

    /// Marks of a text highlight; empty when orphaned
    pub fn marks_of(&self, id: &str) -> Vec<NodeId> {
        match self.highlights.get(id).map(|t| &t.projection) {
            Some(Projection::Text { marks }) => marks.clone(),
            _ => Vec::new(),
        }
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Initial load. Goes through the queue so a legacy record is converted
    /// and persisted exactly once.
    pub async fn load(&mut self) -> Result<ReconcileReport, PersistenceError> {
        let record = self.queue.enqueue(|_| {}).wait().await?;
        let report = self.reconcile(&record);
        info!(
            origin = %self.queue.origin(),
            notes = self.notes.len(),
            highlights = self.highlights.len(),
            "Annotations loaded"
        );
        Ok(report)
    }

    /// Handle a storage change. Changes for other origins are ignored.
    pub fn apply_change(&mut self, change: &RecordChange) -> Option<ReconcileReport> {
        if change.origin != self.queue.origin() {
            return None;
        }
        let record = match &change.new_value {
            Some(value) => Record::from_stored(Some(value.clone())).record,
            None => Record::default(),
        };
        Some(self.reconcile(&record))
    }

    /// Bring the tracked set in line with `record`. Idempotent.
    pub fn reconcile(&mut self, record: &Record) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let visible: BTreeMap<&str, &Note> = record
            .notes
            .iter()
            .filter(|n| n.visible)
            .map(|n| (n.id.as_str(), n))
            .collect();
        self.hidden = record
            .notes
            .iter()
            .filter(|n| !n.visible)
            .map(|n| (n.id.clone(), n.clone()))
            .collect();

        let stale: Vec<String> = self
            .notes
            .keys()
            .filter(|id| !visible.contains_key(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            self.untrack_note(&id);
            report.removed += 1;
        }
        for note in visible.values() {
            tally(&mut report, self.upsert_note(note));
        }

        let incoming: BTreeMap<&str, &Highlight> = record
            .highlights
            .iter()
            .map(|h| (h.id.as_str(), h))
            .collect();
        let stale: Vec<String> = self
            .highlights
            .keys()
            .filter(|id| !incoming.contains_key(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            self.untrack_highlight(&id);
            report.removed += 1;
        }
        for highlight in incoming.values() {
            tally(&mut report, self.upsert_highlight(highlight));
        }

        debug!(
            origin = %self.queue.origin(),
            created = report.created,
            updated = report.updated,
            removed = report.removed,
            unchanged = report.unchanged,
            "Reconciled"
        );
        report
    }

    fn upsert_note(&mut self, note: &Note) -> Applied {
        if let Some(tracked) = self.notes.get_mut(&note.id) {
            if tracked.note == *note {
                return Applied::Unchanged;
            }
            let anchor_changed = tracked.note.anchor != note.anchor;
            tracked.note = note.clone();
            self.surface.render_note(tracked.overlay.handle, note);
            if anchor_changed {
                tracked.overlay.anchor = note.anchor.clone();
                tracked.overlay.attach(&self.document, &mut self.gate);
            }
            tracked.overlay.apply(&self.document, &mut self.surface, &self.gate);
            return Applied::Updated;
        }

        let handle = self.surface.mount(&note.id, OverlayKind::Note);
        self.surface.render_note(handle, note);
        let mut overlay = TrackedOverlay::new(note.id.clone(), handle, note.anchor.clone());
        overlay.attach(&self.document, &mut self.gate);
        overlay.apply(&self.document, &mut self.surface, &self.gate);
        if overlay.target.is_none() {
            debug!(note_id = %note.id, selector = %note.anchor.selector, "Note anchor unresolved");
        }
        self.hidden.remove(&note.id);
        self.notes.insert(
            note.id.clone(),
            TrackedNote {
                note: note.clone(),
                overlay,
            },
        );
        Applied::Created
    }

    fn untrack_note(&mut self, id: &str) -> Option<Note> {
        let tracked = self.notes.remove(id)?;
        tracked.overlay.detach(&mut self.surface, &mut self.gate);
        Some(tracked.note)
    }

    fn upsert_highlight(&mut self, highlight: &Highlight) -> Applied {
        if let Some(tracked) = self.highlights.get_mut(&highlight.id) {
            if tracked.highlight == *highlight {
                return Applied::Unchanged;
            }
            let anchor_changed = tracked.highlight.anchor != highlight.anchor;
            tracked.highlight = highlight.clone();
            match (&mut tracked.projection, &highlight.kind) {
                (Projection::Area(overlay), HighlightKind::Area { bounds }) => {
                    self.surface.render_area(overlay.handle, *bounds, &highlight.color);
                    overlay.default_position = Some(bounds.top_left().into());
                    if anchor_changed {
                        overlay.anchor = highlight.anchor.clone();
                        overlay.attach(&self.document, &mut self.gate);
                    }
                    overlay.apply(&self.document, &mut self.surface, &self.gate);
                    return Applied::Updated;
                }
                (Projection::Text { marks }, HighlightKind::Text { .. }) => {
                    for mark in marks.iter() {
                        self.surface.paint_mark(*mark, &highlight.id, &highlight.color);
                    }
                    return Applied::Updated;
                }
                _ => {}
            }
            // Kind changed: rebuild from scratch
            self.untrack_highlight(&highlight.id);
            self.track_highlight(highlight, Vec::new());
            return Applied::Updated;
        }

        self.track_highlight(highlight, Vec::new());
        Applied::Created
    }

    /// Start tracking a highlight. `known_marks` seeds a text highlight whose
    /// marks are already known to the caller.
    fn track_highlight(&mut self, highlight: &Highlight, known_marks: Vec<NodeId>) {
        let projection = match &highlight.kind {
            HighlightKind::Area { bounds } => {
                let handle = self.surface.mount(&highlight.id, OverlayKind::AreaHighlight);
                self.surface.render_area(handle, *bounds, &highlight.color);
                let mut overlay =
                    TrackedOverlay::new(highlight.id.clone(), handle, highlight.anchor.clone())
                        .with_default_position(bounds.top_left().into());
                overlay.attach(&self.document, &mut self.gate);
                overlay.apply(&self.document, &mut self.surface, &self.gate);
                Projection::Area(overlay)
            }
            HighlightKind::Text { .. } => {
                let mut marks = find_marks(&self.document, &highlight.id);
                for mark in known_marks {
                    if !marks.contains(&mark) {
                        marks.push(mark);
                    }
                }
                if marks.is_empty() {
                    debug!(highlight_id = %highlight.id, "Text highlight has no marks in page");
                }
                for mark in &marks {
                    self.surface.paint_mark(*mark, &highlight.id, &highlight.color);
                }
                Projection::Text { marks }
            }
        };
        self.highlights.insert(
            highlight.id.clone(),
            TrackedHighlight {
                highlight: highlight.clone(),
                projection,
            },
        );
    }

    fn untrack_highlight(&mut self, id: &str) -> Option<Highlight> {
        let tracked = self.highlights.remove(id)?;
        match &tracked.projection {
            Projection::Area(overlay) => overlay.detach(&mut self.surface, &mut self.gate),
            Projection::Text { marks } => {
                for mark in marks {
                    self.surface.clear_mark(*mark);
                }
            }
        }
        Some(tracked.highlight)
    }

    // ========================================================================
    // Note operations
    // ========================================================================

    /// Create a note at a viewport point, anchored to the best element under
    /// it. `patch` supplies text, style and so on; its anchor is ignored.
    pub fn create_at(&mut self, point: Point, patch: &NotePatch) -> (String, MutationHandle) {
        let mut note = Note::from_patch(new_note_id(), patch);
        note.anchor = AnchorResolver::anchor_at(&self.document, point);
        let id = note.id.clone();
        let handle = self.create_with(note);
        (id, handle)
    }

    /// Track and persist a fully formed note
    pub fn create_with(&mut self, note: Note) -> MutationHandle {
        if note.visible {
            self.upsert_note(&note);
        } else {
            self.hidden.insert(note.id.clone(), note.clone());
        }
        info!(note_id = %note.id, selector = %note.anchor.selector, "Note created");
        self.queue.enqueue(move |record| record.upsert_note(note))
    }

    /// Apply a field-level patch. Persisted against the freshly read record;
    /// dropped there if the note no longer exists.
    pub fn edit(&mut self, id: &str, patch: NotePatch) -> MutationHandle {
        self.apply_local(id, &patch);
        let id = id.to_string();
        self.queue.enqueue(move |record| match record.note_mut(&id) {
            Some(note) => note.apply(&patch),
            None => debug!(note_id = %id, "Patch for missing note dropped"),
        })
    }

    pub fn move_note(&mut self, id: &str, offset: Offset) -> MutationHandle {
        self.edit(id, NotePatch::offset(offset))
    }

    pub fn set_visible(&mut self, id: &str, visible: bool) -> MutationHandle {
        self.edit(id, NotePatch::visible(visible))
    }

    pub fn resize(&mut self, id: &str, size: NoteSize) -> MutationHandle {
        self.edit(id, NotePatch::size(size))
    }

    /// Flip `minimized`. The persisted flip is applied to the fresh record, so
    /// two concurrent toggles cancel out.
    pub fn toggle_minimized(&mut self, id: &str) -> MutationHandle {
        if let Some(current) = self.known_note(id).map(|n| n.minimized) {
            self.apply_local(id, &NotePatch::minimized(!current));
        }
        let id = id.to_string();
        self.queue.enqueue(move |record| {
            if let Some(note) = record.note_mut(&id) {
                note.minimized = !note.minimized;
            }
        })
    }

    /// Remove a note. Unknown ids are a no-op locally.
    pub fn delete(&mut self, id: &str) -> MutationHandle {
        if self.untrack_note(id).is_some() || self.hidden.remove(id).is_some() {
            info!(note_id = %id, "Note deleted");
        }
        let id = id.to_string();
        self.queue.enqueue(move |record| {
            record.remove_note(&id);
        })
    }

    fn apply_local(&mut self, id: &str, patch: &NotePatch) {
        let Some(mut note) = self.known_note(id).cloned() else {
            return;
        };
        note.apply(patch);
        if note.visible {
            self.upsert_note(&note);
        } else {
            self.untrack_note(id);
            self.hidden.insert(note.id.clone(), note);
        }
    }

    // ========================================================================
    // Highlight operations
    // ========================================================================

    /// Track a text highlight around `mark`, an element the host has just
    /// wrapped around the selection
    pub fn add_text_highlight(
        &mut self,
        mark: NodeId,
        text: &str,
        color: &str,
    ) -> (String, MutationHandle) {
        let id = new_highlight_id();
        let container = self
            .document
            .parent(mark)
            .unwrap_or_else(|| self.document.body());
        let origin = self
            .document
            .bounding_rect(mark)
            .map(|r| r.top_left())
            .unwrap_or_default();
        let anchor = AnchorResolver::anchor_for(&self.document, container, origin);
        let highlight = Highlight::text(id.clone(), text, anchor, color);

        self.track_highlight(&highlight, vec![mark]);
        let handle = self
            .queue
            .enqueue(move |record| record.upsert_highlight(highlight));
        (id, handle)
    }

    /// Track an area highlight over `bounds`. Boxes not larger than
    /// [`MIN_AREA_EDGE_PX`] on both axes are ignored.
    pub fn add_area_highlight(
        &mut self,
        bounds: Rect,
        color: &str,
    ) -> Option<(String, MutationHandle)> {
        if bounds.width <= MIN_AREA_EDGE_PX || bounds.height <= MIN_AREA_EDGE_PX {
            debug!(width = bounds.width, height = bounds.height, "Area too small, ignored");
            return None;
        }
        let id = new_highlight_id();
        let target = self
            .document
            .element_from_point(bounds.center())
            .unwrap_or_else(|| self.document.body());
        let anchor = AnchorResolver::anchor_for(&self.document, target, bounds.top_left());
        let highlight = Highlight::area(id.clone(), bounds, anchor, color);

        self.track_highlight(&highlight, Vec::new());
        let handle = self
            .queue
            .enqueue(move |record| record.upsert_highlight(highlight));
        Some((id, handle))
    }

    pub fn delete_highlight(&mut self, id: &str) -> MutationHandle {
        self.untrack_highlight(id);
        let id = id.to_string();
        self.queue.enqueue(move |record| {
            record.remove_highlight(&id);
        })
    }

    /// Drop every highlight of the origin, unreadable ones included
    pub fn clear_highlights(&mut self) -> MutationHandle {
        for id in self.tracked_highlight_ids() {
            self.untrack_highlight(&id);
        }
        self.queue.enqueue(|record| {
            record.clear_highlights();
        })
    }

    // ========================================================================
    // Position passes
    // ========================================================================

    /// Request a position pass for the next frame
    pub fn schedule(&mut self, trigger: Trigger) -> bool {
        self.reconciler.request(trigger)
    }

    /// Run the pending pass, if any. Call once per display frame.
    pub fn on_frame(&mut self) -> Option<PassReport> {
        let pass = self.reconciler.take()?;
        let overlays = self
            .notes
            .values_mut()
            .map(|t| &mut t.overlay)
            .chain(self.highlights.values_mut().filter_map(|t| match &mut t.projection {
                Projection::Area(overlay) => Some(overlay),
                Projection::Text { .. } => None,
            }));
        Some(self.reconciler.run_pass(
            pass,
            &self.document,
            &mut self.surface,
            &mut self.gate,
            overlays,
        ))
    }

    // ========================================================================
    // Placement
    // ========================================================================

    pub fn start_placement(&mut self, style: Option<StylePatch>) {
        self.placement.arm(style);
        self.surface.set_cursor(Cursor::Crosshair);
    }

    pub fn cancel_placement(&mut self) -> bool {
        self.surface.set_cursor(Cursor::Default);
        self.placement.cancel()
    }

    /// Feed a page click. Returns the new note's id when the click committed
    /// a placement.
    pub fn handle_click(
        &mut self,
        at: Point,
        on_overlay: bool,
    ) -> Option<(String, MutationHandle)> {
        match self.placement.click(at, on_overlay) {
            ClickOutcome::Commit { at, style } => {
                self.surface.set_cursor(Cursor::Default);
                let patch = NotePatch {
                    style,
                    ..NotePatch::default()
                };
                Some(self.create_at(at, &patch))
            }
            ClickOutcome::OnOverlay | ClickOutcome::Ignored => None,
        }
    }

    /// Give back the page and the surface
    pub fn into_parts(self) -> (D, S) {
        (self.document, self.surface)
    }
}

fn tally(report: &mut ReconcileReport, applied: Applied) {
    match applied {
        Applied::Created => report.created += 1,
        Applied::Updated => report.updated += 1,
        Applied::Unchanged => report.unchanged += 1,
    }
}

fn find_marks<D: Document + ?Sized>(doc: &D, highlight_id: &str) -> Vec<NodeId> {
    descendants(doc)
        .into_iter()
        .filter(|n| doc.attribute(*n, HIGHLIGHT_ID_ATTR) == Some(highlight_id))
        .collect()
}
