//! Overlay rendering interface
//!
//! The engine decides *where* an overlay goes and *whether* it is shown; how a
//! note or an area box actually looks is up to the host's [`OverlaySurface`].

mod recording;

pub use recording::{MarkState, OverlayState, RecordingSurface};

use crate::anchor::Position;
use crate::annotations::Note;
use crate::dom::{NodeId, Rect};
use serde::{Deserialize, Serialize};

/// Opaque handle to a mounted overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OverlayHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    Note,
    AreaHighlight,
}

/// Page cursor, switched while placement mode is armed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cursor {
    #[default]
    Default,
    Crosshair,
}

/// Host-side renderer for overlays and text-highlight marks.
///
/// A freshly mounted overlay is hidden until the first [`place`](Self::place).
pub trait OverlaySurface {
    fn mount(&mut self, id: &str, kind: OverlayKind) -> OverlayHandle;

    /// Refresh a note overlay's content, style and size
    fn render_note(&mut self, handle: OverlayHandle, note: &Note);

    /// Refresh an area-highlight box; only the size of `bounds` is used
    fn render_area(&mut self, handle: OverlayHandle, bounds: Rect, color: &str);

    /// Show the overlay with its top-left corner at `position` (fixed coordinates)
    fn place(&mut self, handle: OverlayHandle, position: Position);

    /// Remove the overlay from layout and hit-testing without unmounting it
    fn hide(&mut self, handle: OverlayHandle);

    /// Faded overlays are painted transparent and ignore input
    fn set_faded(&mut self, handle: OverlayHandle, faded: bool);

    fn unmount(&mut self, handle: OverlayHandle);

    /// Tag and color a page-embedded text-highlight mark
    fn paint_mark(&mut self, node: NodeId, highlight_id: &str, color: &str);

    /// Strip highlight styling from a mark
    fn clear_mark(&mut self, node: NodeId);

    fn set_cursor(&mut self, cursor: Cursor);
}
