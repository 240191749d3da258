//! Viewport-intersection watches
//!
//! Each tracked overlay may hold one watch on its resolved target element.
//! The watch fires with a zero overlap threshold against the viewport grown by
//! a small margin, so overlays come back slightly before their target scrolls
//! into view.

use crate::dom::{Document, NodeId};
use std::collections::HashMap;
use tracing::trace;

/// Default margin around the viewport, in pixels
pub const DEFAULT_MARGIN_PX: f64 = 50.0;

#[derive(Debug, Clone, Copy)]
struct Watch {
    target: NodeId,
    intersecting: bool,
}

/// A visibility transition reported by [`VisibilityGate::poll`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub key: String,
    pub intersecting: bool,
}

#[derive(Debug)]
pub struct VisibilityGate {
    margin: f64,
    watches: HashMap<String, Watch>,
}

impl VisibilityGate {
    pub fn new(margin: f64) -> Self {
        Self {
            margin: margin.max(0.0),
            watches: HashMap::new(),
        }
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    /// Start (or replace) the watch for `key`. The initial verdict is computed
    /// right away and returned.
    pub fn watch<D: Document + ?Sized>(&mut self, doc: &D, key: &str, target: NodeId) -> bool {
        let intersecting = self.intersects(doc, target);
        self.watches.insert(
            key.to_string(),
            Watch {
                target,
                intersecting,
            },
        );
        trace!(key, %target, intersecting, "Watch attached");
        intersecting
    }

    /// Release a watch; returns whether one existed
    pub fn unwatch(&mut self, key: &str) -> bool {
        self.watches.remove(key).is_some()
    }

    pub fn target(&self, key: &str) -> Option<NodeId> {
        self.watches.get(key).map(|w| w.target)
    }

    /// Current verdict, `None` when `key` has no watch
    pub fn verdict(&self, key: &str) -> Option<bool> {
        self.watches.get(key).map(|w| w.intersecting)
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Re-evaluate every watch and report the ones whose verdict flipped
    pub fn poll<D: Document + ?Sized>(&mut self, doc: &D) -> Vec<Transition> {
        let mut transitions = Vec::new();
        let margin = self.margin;
        for (key, watch) in self.watches.iter_mut() {
            let now = intersects_with_margin(doc, watch.target, margin);
            if now != watch.intersecting {
                watch.intersecting = now;
                transitions.push(Transition {
                    key: key.clone(),
                    intersecting: now,
                });
            }
        }
        transitions.sort_by(|a, b| a.key.cmp(&b.key));
        transitions
    }

    fn intersects<D: Document + ?Sized>(&self, doc: &D, target: NodeId) -> bool {
        intersects_with_margin(doc, target, self.margin)
    }
}

impl Default for VisibilityGate {
    fn default() -> Self {
        Self::new(DEFAULT_MARGIN_PX)
    }
}

/// A detached target never intersects
fn intersects_with_margin<D: Document + ?Sized>(doc: &D, target: NodeId, margin: f64) -> bool {
    let area = doc.viewport().as_rect().inflate(margin);
    doc.bounding_rect(target)
        .is_some_and(|rect| rect.touches(&area))
}
