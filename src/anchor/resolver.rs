//! Anchor resolution and placement arithmetic

use super::codec::SelectorCodec;
use super::models::{AnchorReference, Offset, Position};
use crate::dom::{Document, NodeId, Point};
use tracing::trace;

/// How far up from the clicked element we look for a stable container
pub const MAX_ANCESTOR_WALK: usize = 10;

/// Tags considered meaningful enough to anchor to without an id or class
const SEMANTIC_TAGS: &[&str] = &[
    "article", "section", "main", "header", "footer", "aside", "nav", "div", "p", "h1", "h2",
    "h3", "h4", "h5", "h6",
];

/// Turns anchors into live elements and viewport positions
pub struct AnchorResolver;

impl AnchorResolver {
    /// The element an anchor currently points at, `None` when the locator no
    /// longer matches anything.
    pub fn resolve_target<D: Document + ?Sized>(
        doc: &D,
        anchor: &AnchorReference,
    ) -> Option<NodeId> {
        let target = SelectorCodec::decode(doc, &anchor.selector);
        if target.is_none() {
            trace!(selector = %anchor.selector, "Anchor did not resolve");
        }
        target
    }

    /// Viewport position of an overlay given its (possibly absent) target.
    ///
    /// A connected target yields its top-left corner plus the anchor offset.
    /// Otherwise the anchor's fallback is used, and without one the overlay
    /// has nowhere to go.
    pub fn compute_position<D: Document + ?Sized>(
        doc: &D,
        target: Option<NodeId>,
        anchor: &AnchorReference,
    ) -> Option<Position> {
        if let Some(rect) = target.and_then(|t| doc.bounding_rect(t)) {
            return Some(Position::new(
                rect.left() + anchor.offset.x,
                rect.top() + anchor.offset.y,
            ));
        }
        anchor.fallback
    }

    /// Pick the element a point-created annotation should anchor to.
    ///
    /// Starts at the topmost element under `point` and walks up to the first
    /// ancestor that has an id, at least one class, or a semantic tag. Gives
    /// up after [`MAX_ANCESTOR_WALK`] steps. Always returns something: the body
    /// when nothing better qualifies.
    pub fn find_best_target<D: Document + ?Sized>(doc: &D, point: Point) -> NodeId {
        let body = doc.body();
        let mut current = doc.element_from_point(point);
        let mut steps = 0;

        while let Some(node) = current {
            if node == body || node == doc.root() || steps >= MAX_ANCESTOR_WALK {
                break;
            }
            if is_significant(doc, node) {
                return node;
            }
            current = doc.parent(node);
            steps += 1;
        }
        body
    }

    /// Build an anchor for an annotation placed at `point`
    pub fn anchor_at<D: Document + ?Sized>(doc: &D, point: Point) -> AnchorReference {
        let target = Self::find_best_target(doc, point);
        Self::anchor_for(doc, target, point)
    }

    /// Build an anchor that places `point` relative to `target`
    pub fn anchor_for<D: Document + ?Sized>(
        doc: &D,
        target: NodeId,
        point: Point,
    ) -> AnchorReference {
        let origin = doc
            .bounding_rect(target)
            .map(|r| r.top_left())
            .unwrap_or_default();
        AnchorReference::new(
            SelectorCodec::encode(doc, target),
            Offset::between(origin, point),
        )
    }
}

fn is_significant<D: Document + ?Sized>(doc: &D, node: NodeId) -> bool {
    doc.element_id(node).is_some()
        || !doc.class_list(node).is_empty()
        || SEMANTIC_TAGS.contains(&doc.tag_name(node))
}
