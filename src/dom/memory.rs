//! In-memory document implementation
//!
//! Elements live in an arena indexed by [`NodeId`]. Removing an element only
//! detaches it, so stale handles held by overlays stay valid and simply report
//! `is_connected() == false`.

use super::geometry::{Point, Rect, Viewport};
use super::{descendants, Document, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct ElementNode {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attributes: BTreeMap<String, String>,
    /// Document coordinates (before scroll)
    rect: Rect,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Builder for a new element
#[derive(Debug, Clone, Default)]
pub struct ElementSpec {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attributes: BTreeMap<String, String>,
    rect: Rect,
}

impl ElementSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn rect(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.rect = Rect::new(x, y, width, height);
        self
    }
}

/// Serialized page used by the CLI `resolve` command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSnapshot {
    #[serde(default)]
    pub viewport: Viewport,
    #[serde(default)]
    pub scroll: Point,
    pub body: ElementSnapshot,
}

/// One element of a [`PageSnapshot`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub rect: Rect,
    #[serde(default)]
    pub children: Vec<ElementSnapshot>,
}

/// Arena-backed [`Document`]
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    nodes: Vec<ElementNode>,
    root: NodeId,
    body: NodeId,
    viewport: Viewport,
    scroll: Point,
}

impl MemoryDocument {
    /// An empty page: `<html><body></body></html>` filling the viewport
    pub fn new(viewport: Viewport) -> Self {
        let page = viewport.as_rect();
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            body: NodeId(1),
            viewport,
            scroll: Point::default(),
        };
        doc.nodes.push(ElementNode {
            tag: "html".into(),
            id: None,
            classes: Vec::new(),
            attributes: BTreeMap::new(),
            rect: page,
            parent: None,
            children: vec![NodeId(1)],
        });
        doc.nodes.push(ElementNode {
            tag: "body".into(),
            id: None,
            classes: Vec::new(),
            attributes: BTreeMap::new(),
            rect: page,
            parent: Some(NodeId(0)),
            children: Vec::new(),
        });
        doc
    }

    /// Build a document from a snapshot. The snapshot's top element always
    /// becomes `<body>` whatever tag it declares.
    pub fn from_snapshot(snapshot: &PageSnapshot) -> Self {
        let mut doc = Self::new(snapshot.viewport);
        doc.scroll = snapshot.scroll;
        let body = doc.body;
        {
            let node = &mut doc.nodes[body.0];
            node.id = snapshot.body.id.clone().filter(|id| !id.is_empty());
            node.classes = snapshot.body.classes.clone();
            node.attributes = snapshot.body.attributes.clone();
            if snapshot.body.rect != Rect::default() {
                node.rect = snapshot.body.rect;
            }
        }
        for child in &snapshot.body.children {
            doc.append_snapshot(body, child);
        }
        doc
    }

    fn append_snapshot(&mut self, parent: NodeId, snapshot: &ElementSnapshot) {
        let mut spec = ElementSpec::new(&snapshot.tag);
        spec.id = snapshot.id.clone();
        spec.classes = snapshot.classes.clone();
        spec.attributes = snapshot.attributes.clone();
        spec.rect = snapshot.rect;
        let node = self.append(parent, spec);
        for child in &snapshot.children {
            self.append_snapshot(node, child);
        }
    }

    /// Append a new element as the last child of `parent`
    pub fn append(&mut self, parent: NodeId, spec: ElementSpec) -> NodeId {
        let index = self.nodes.get(parent.0).map_or(0, |p| p.children.len());
        self.insert(parent, index, spec)
    }

    /// Insert a new element at `index` among `parent`'s children
    pub fn insert(&mut self, parent: NodeId, index: usize, spec: ElementSpec) -> NodeId {
        let id = NodeId(self.nodes.len());
        let has_parent = parent.0 < self.nodes.len();
        self.nodes.push(ElementNode {
            tag: spec.tag,
            id: spec.id.filter(|id| !id.is_empty()),
            classes: spec.classes,
            attributes: spec.attributes,
            rect: spec.rect,
            parent: has_parent.then_some(parent),
            children: Vec::new(),
        });
        if has_parent {
            let children = &mut self.nodes[parent.0].children;
            let at = index.min(children.len());
            children.insert(at, id);
        }
        id
    }

    /// Detach an element (and its subtree) from the tree
    pub fn remove(&mut self, node: NodeId) {
        let Some(parent) = self.nodes.get(node.0).and_then(|n| n.parent) else {
            return;
        };
        self.nodes[parent.0].children.retain(|c| *c != node);
        self.nodes[node.0].parent = None;
    }

    /// Replace an element's rectangle (document coordinates)
    pub fn set_rect(&mut self, node: NodeId, rect: Rect) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.rect = rect;
        }
    }

    /// Shift an element and its whole subtree, like a reflow would
    pub fn move_by(&mut self, node: NodeId, dx: f64, dy: f64) {
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if let Some(n) = self.nodes.get_mut(current.0) {
                n.rect = n.rect.translated(dx, dy);
                stack.extend(n.children.iter().copied());
            }
        }
    }

    pub fn set_id(&mut self, node: NodeId, id: Option<&str>) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.id = id.filter(|id| !id.is_empty()).map(str::to_string);
        }
    }

    pub fn set_classes(&mut self, node: NodeId, classes: &[&str]) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.classes = classes.iter().map(|c| c.to_string()).collect();
        }
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.attributes.insert(name.to_string(), value.to_string());
        }
    }

    pub fn scroll_to(&mut self, x: f64, y: f64) {
        self.scroll = Point::new(x, y);
    }

    pub fn scroll_position(&self) -> Point {
        self.scroll
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    /// Number of connected elements, root included
    pub fn len(&self) -> usize {
        descendants(self).len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[self.body.0].children.is_empty()
    }

    fn node(&self, node: NodeId) -> Option<&ElementNode> {
        self.nodes.get(node.0)
    }
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new(Viewport::default())
    }
}

impl Document for MemoryDocument {
    fn root(&self) -> NodeId {
        self.root
    }

    fn body(&self) -> NodeId {
        self.body
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).and_then(|n| n.parent)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.node(node).map(|n| n.children.clone()).unwrap_or_default()
    }

    fn tag_name(&self, node: NodeId) -> &str {
        self.node(node).map_or("", |n| n.tag.as_str())
    }

    fn element_id(&self, node: NodeId) -> Option<&str> {
        self.node(node).and_then(|n| n.id.as_deref())
    }

    fn class_list(&self, node: NodeId) -> &[String] {
        self.node(node)
            .map(|n| n.classes.as_slice())
            .unwrap_or(&[])
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        let n = self.node(node)?;
        match name {
            "id" => n.id.as_deref(),
            _ => n.attributes.get(name).map(String::as_str),
        }
    }

    fn bounding_rect(&self, node: NodeId) -> Option<Rect> {
        if !self.is_connected(node) {
            return None;
        }
        let rect = self.node(node)?.rect;
        Some(rect.translated(-self.scroll.x, -self.scroll.y))
    }

    fn is_connected(&self, node: NodeId) -> bool {
        let mut current = node;
        loop {
            if current == self.root {
                return true;
            }
            match self.parent(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    fn element_from_point(&self, point: Point) -> Option<NodeId> {
        // Later in document order paints on top.
        descendants(self).into_iter().rev().find(|node| {
            self.bounding_rect(*node)
                .is_some_and(|rect| rect.contains(point))
        })
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }
}
