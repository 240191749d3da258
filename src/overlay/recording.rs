//! In-memory surface that records what would be on screen

use super::{Cursor, OverlayHandle, OverlayKind, OverlaySurface};
use crate::anchor::Position;
use crate::annotations::Note;
use crate::dom::{NodeId, Rect};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::trace;

/// Last known state of one mounted overlay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayState {
    pub id: String,
    pub kind: OverlayKind,
    /// `None` while hidden
    pub position: Option<Position>,
    pub displayed: bool,
    pub faded: bool,
    /// Last rendered note content (note overlays)
    pub note: Option<Note>,
    /// Last rendered box (area highlights)
    pub bounds: Option<Rect>,
    pub color: Option<String>,
    /// Number of content renders, handy for spotting redundant work
    pub renders: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkState {
    pub highlight_id: String,
    pub color: String,
}

/// [`OverlaySurface`] backed by plain maps. Used by the CLI's `resolve`
/// command and throughout the tests.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    next_handle: u64,
    overlays: BTreeMap<OverlayHandle, OverlayState>,
    marks: BTreeMap<NodeId, MarkState>,
    cursor: Cursor,
    mounted_total: u64,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, handle: OverlayHandle) -> Option<&OverlayState> {
        self.overlays.get(&handle)
    }

    /// Look an overlay up by the entity id it was mounted for
    pub fn by_id(&self, id: &str) -> Option<&OverlayState> {
        self.overlays.values().find(|o| o.id == id)
    }

    pub fn overlays(&self) -> impl Iterator<Item = &OverlayState> {
        self.overlays.values()
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    pub fn mark(&self, node: NodeId) -> Option<&MarkState> {
        self.marks.get(&node)
    }

    pub fn marks(&self) -> &BTreeMap<NodeId, MarkState> {
        &self.marks
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Total mounts since creation, including overlays since unmounted
    pub fn mounted_total(&self) -> u64 {
        self.mounted_total
    }
}

impl OverlaySurface for RecordingSurface {
    fn mount(&mut self, id: &str, kind: OverlayKind) -> OverlayHandle {
        self.next_handle += 1;
        self.mounted_total += 1;
        let handle = OverlayHandle(self.next_handle);
        self.overlays.insert(
            handle,
            OverlayState {
                id: id.to_string(),
                kind,
                position: None,
                displayed: false,
                faded: false,
                note: None,
                bounds: None,
                color: None,
                renders: 0,
            },
        );
        trace!(id, ?handle, "Overlay mounted");
        handle
    }

    fn render_note(&mut self, handle: OverlayHandle, note: &Note) {
        if let Some(state) = self.overlays.get_mut(&handle) {
            state.note = Some(note.clone());
            state.color = Some(note.style.background.clone());
            state.renders += 1;
        }
    }

    fn render_area(&mut self, handle: OverlayHandle, bounds: Rect, color: &str) {
        if let Some(state) = self.overlays.get_mut(&handle) {
            state.bounds = Some(bounds);
            state.color = Some(color.to_string());
            state.renders += 1;
        }
    }

    fn place(&mut self, handle: OverlayHandle, position: Position) {
        if let Some(state) = self.overlays.get_mut(&handle) {
            state.position = Some(position);
            state.displayed = true;
        }
    }

    fn hide(&mut self, handle: OverlayHandle) {
        if let Some(state) = self.overlays.get_mut(&handle) {
            state.position = None;
            state.displayed = false;
        }
    }

    fn set_faded(&mut self, handle: OverlayHandle, faded: bool) {
        if let Some(state) = self.overlays.get_mut(&handle) {
            state.faded = faded;
        }
    }

    fn unmount(&mut self, handle: OverlayHandle) {
        if let Some(state) = self.overlays.remove(&handle) {
            trace!(id = %state.id, ?handle, "Overlay unmounted");
        }
    }

    fn paint_mark(&mut self, node: NodeId, highlight_id: &str, color: &str) {
        self.marks.insert(
            node,
            MarkState {
                highlight_id: highlight_id.to_string(),
                color: color.to_string(),
            },
        );
    }

    fn clear_mark(&mut self, node: NodeId) {
        self.marks.remove(&node);
    }

    fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mounted_overlay_starts_hidden() {
        let mut surface = RecordingSurface::new();
        let handle = surface.mount("note-1", OverlayKind::Note);
        let state = surface.get(handle).unwrap();
        assert!(!state.displayed);
        assert!(state.position.is_none());
        assert_eq!(surface.by_id("note-1").unwrap().kind, OverlayKind::Note);
    }

    #[test]
    fn test_hide_clears_position() {
        let mut surface = RecordingSurface::new();
        let handle = surface.mount("hl-1", OverlayKind::AreaHighlight);
        surface.place(handle, Position::new(10.0, 20.0));
        assert!(surface.get(handle).unwrap().displayed);

        surface.hide(handle);
        let state = surface.get(handle).unwrap();
        assert!(!state.displayed);
        assert!(state.position.is_none());
    }

    #[test]
    fn test_unmount_keeps_total() {
        let mut surface = RecordingSurface::new();
        let a = surface.mount("a", OverlayKind::Note);
        surface.mount("b", OverlayKind::Note);
        surface.unmount(a);
        assert_eq!(surface.len(), 1);
        assert_eq!(surface.mounted_total(), 2);
        // Unknown handles are ignored
        surface.unmount(a);
        surface.place(a, Position::new(0.0, 0.0));
        assert_eq!(surface.len(), 1);
    }
}
