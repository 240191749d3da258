//! Document model
//!
//! The annotation engine never talks to a browser directly. It sees the page
//! through the [`Document`] trait: a tree of elements with tag names, ids,
//! classes, attributes and viewport rectangles. The host environment provides
//! the implementation; [`MemoryDocument`] is the in-process one used by the CLI
//! and the tests.

pub mod geometry;
mod memory;
pub mod selector;

pub use geometry::{Point, Rect, Viewport};
pub use memory::{ElementSnapshot, ElementSpec, MemoryDocument, PageSnapshot};
pub use selector::{css_escape, query_selector, query_selector_all, Selector, SelectorError};

use serde::{Deserialize, Serialize};

/// Opaque handle to an element of a [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Read-only view of a rendered page.
///
/// Only elements are modelled; text nodes never appear in `children`.
/// Accessors called with a node that does not belong to this document return
/// empty values rather than panicking.
pub trait Document {
    /// The document element (`<html>`)
    fn root(&self) -> NodeId;

    /// The `<body>` element
    fn body(&self) -> NodeId;

    /// Parent element, `None` for the root or a detached subtree's top
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Element children in document order
    fn children(&self, node: NodeId) -> Vec<NodeId>;

    /// Lower-case tag name
    fn tag_name(&self, node: NodeId) -> &str;

    /// The `id` attribute, if present and non-empty
    fn element_id(&self, node: NodeId) -> Option<&str>;

    /// Class list in declaration order
    fn class_list(&self, node: NodeId) -> &[String];

    /// Any other attribute (e.g. `data-highlight-id`)
    fn attribute(&self, node: NodeId, name: &str) -> Option<&str>;

    /// Current bounding box in viewport coordinates; `None` once detached
    fn bounding_rect(&self, node: NodeId) -> Option<Rect>;

    /// Whether the element is reachable from the root
    fn is_connected(&self, node: NodeId) -> bool;

    /// Topmost element under a viewport point
    fn element_from_point(&self, point: Point) -> Option<NodeId>;

    /// Current viewport size
    fn viewport(&self) -> Viewport;
}

/// Pre-order traversal of every connected element, starting at the root
pub fn descendants<D: Document + ?Sized>(doc: &D) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![doc.root()];
    while let Some(node) = stack.pop() {
        out.push(node);
        let children = doc.children(node);
        stack.extend(children.into_iter().rev());
    }
    out
}

/// 0-based position of `node` among its parent's element children
pub fn sibling_index<D: Document + ?Sized>(doc: &D, node: NodeId) -> Option<usize> {
    let parent = doc.parent(node)?;
    doc.children(parent).iter().position(|c| *c == node)
}
