//! Element <-> locator string conversion
//!
//! Locators are best-effort: `decode(encode(e))` finds `e` right after
//! encoding, but once the page mutates the same string may resolve to a
//! different element or to nothing at all.

use super::models::BODY_SELECTOR;
use crate::dom::{
    css_escape, query_selector, query_selector_all, sibling_index, Document, NodeId, Selector,
};
use std::fmt::Write as _;
use tracing::debug;

/// Maximum number of ancestors recorded in a positional path
pub const MAX_PATH_DEPTH: usize = 10;

/// Encodes elements as portable locator strings and resolves them back
pub struct SelectorCodec;

impl SelectorCodec {
    /// Build a locator for `node`.
    ///
    /// Preference order:
    /// 1. `#id` when exactly one element carries that id
    /// 2. `tag.class1.class2` when exactly one element matches
    /// 3. a positional path (`tag.firstClass:nth-child(k) > ...`) walking up at
    ///    most [`MAX_PATH_DEPTH`] ancestors, stopping at the first id-bearing
    ///    ancestor or at the body
    pub fn encode<D: Document + ?Sized>(doc: &D, node: NodeId) -> String {
        if node == doc.body() || node == doc.root() {
            return BODY_SELECTOR.to_string();
        }

        if let Some(id) = doc.element_id(node) {
            let candidate = format!("#{}", css_escape(id));
            if count_matches(doc, &candidate) == 1 {
                return candidate;
            }
        }

        let classes = doc.class_list(node);
        if !classes.is_empty() {
            let escaped: Vec<String> = classes.iter().map(|c| css_escape(c)).collect();
            let candidate = format!("{}.{}", doc.tag_name(node), escaped.join("."));
            if count_matches(doc, &candidate) == 1 {
                return candidate;
            }
        }

        positional_path(doc, node)
    }

    /// Resolve a locator to the first matching element.
    ///
    /// Never fails: syntactically invalid or non-matching locators yield `None`.
    pub fn decode<D: Document + ?Sized>(doc: &D, selector: &str) -> Option<NodeId> {
        let selector = selector.trim();
        if selector == BODY_SELECTOR {
            return Some(doc.body());
        }
        match Selector::parse(selector) {
            Ok(parsed) => query_selector(doc, &parsed),
            Err(e) => {
                debug!(selector, error = %e, "Invalid locator");
                None
            }
        }
    }
}

fn count_matches<D: Document + ?Sized>(doc: &D, selector: &str) -> usize {
    Selector::parse(selector)
        .map(|s| query_selector_all(doc, &s).len())
        .unwrap_or(0)
}

fn positional_path<D: Document + ?Sized>(doc: &D, node: NodeId) -> String {
    let body = doc.body();
    let mut segments: Vec<String> = Vec::new();
    let mut reached_body = false;
    let mut current = Some(node);

    while let Some(element) = current {
        if element == body {
            reached_body = true;
            break;
        }
        if segments.len() >= MAX_PATH_DEPTH {
            break;
        }

        let mut segment = doc.tag_name(element).to_string();
        if let Some(id) = doc.element_id(element) {
            segment.push('#');
            segment.push_str(&css_escape(id));
            segments.push(segment);
            break;
        }
        if let Some(first) = doc.class_list(element).first() {
            segment.push('.');
            segment.push_str(&css_escape(first));
        }
        if let Some(index) = sibling_index(doc, element).filter(|i| *i > 0) {
            let _ = write!(segment, ":nth-child({})", index + 1);
        }
        segments.push(segment);
        current = doc.parent(element);
    }

    if segments.is_empty() {
        return BODY_SELECTOR.to_string();
    }
    segments.reverse();
    let path = segments.join(" > ");
    if reached_body {
        format!("{BODY_SELECTOR} > {path}")
    } else {
        path
    }
}
