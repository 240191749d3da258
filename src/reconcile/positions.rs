//! Coalesced overlay position passes
//!
//! Scroll, resize and structural signals all funnel into [`PositionReconciler::request`].
//! At most one pass is pending at any time; triggers that arrive while one is
//! pending are dropped (a structural trigger still upgrades the pending pass so
//! targets get re-resolved). The host runs the pass on its next display frame.

use super::visibility::VisibilityGate;
use crate::anchor::{AnchorReference, AnchorResolver, Position};
use crate::dom::{Document, NodeId};
use crate::overlay::{OverlayHandle, OverlaySurface};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Page activity that can move overlays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scroll,
    Resize,
    /// Subtree additions/removals or id/class attribute edits
    Structural,
}

/// A pass waiting for the next frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingPass {
    /// Re-resolve every overlay's target before positioning
    pub reresolve: bool,
}

/// Projection state the reconciler needs for one overlay
#[derive(Debug, Clone)]
pub struct TrackedOverlay {
    /// Entity id, also the visibility-watch key
    pub key: String,
    pub handle: OverlayHandle,
    pub anchor: AnchorReference,
    /// Element resolved on the last (re-)resolution
    pub target: Option<NodeId>,
    /// Used when neither the target nor the anchor fallback yields a position
    pub default_position: Option<Position>,
}

impl TrackedOverlay {
    pub fn new(key: impl Into<String>, handle: OverlayHandle, anchor: AnchorReference) -> Self {
        Self {
            key: key.into(),
            handle,
            anchor,
            target: None,
            default_position: None,
        }
    }

    pub fn with_default_position(mut self, position: Position) -> Self {
        self.default_position = Some(position);
        self
    }

    /// Resolve the anchor now and (re)attach the visibility watch
    pub fn attach<D: Document + ?Sized>(&mut self, doc: &D, gate: &mut VisibilityGate) {
        self.target = AnchorResolver::resolve_target(doc, &self.anchor);
        match self.target {
            Some(target) => {
                gate.watch(doc, &self.key, target);
            }
            None => {
                gate.unwatch(&self.key);
            }
        }
    }

    /// Re-resolve the anchor, moving the watch when the target changed.
    /// Returns whether it changed.
    pub fn retarget<D: Document + ?Sized>(&mut self, doc: &D, gate: &mut VisibilityGate) -> bool {
        let resolved = AnchorResolver::resolve_target(doc, &self.anchor);
        if resolved == self.target {
            return false;
        }
        self.target = resolved;
        match resolved {
            Some(target) => {
                gate.watch(doc, &self.key, target);
            }
            None => {
                gate.unwatch(&self.key);
            }
        }
        true
    }

    /// No target, or the target left the document
    fn target_is_stale<D: Document + ?Sized>(&self, doc: &D) -> bool {
        self.target.map_or(true, |target| !doc.is_connected(target))
    }

    /// Release the watch and unmount the overlay
    pub fn detach<S: OverlaySurface + ?Sized>(&self, surface: &mut S, gate: &mut VisibilityGate) {
        gate.unwatch(&self.key);
        surface.unmount(self.handle);
    }

    /// Where the overlay should be right now, `None` means hide it
    pub fn position<D: Document + ?Sized>(&self, doc: &D) -> Option<Position> {
        AnchorResolver::compute_position(doc, self.target, &self.anchor).or(self.default_position)
    }

    /// Place or hide the overlay according to its position and the gate
    pub fn apply<D, S>(&self, doc: &D, surface: &mut S, gate: &VisibilityGate)
    where
        D: Document + ?Sized,
        S: OverlaySurface + ?Sized,
    {
        match self.position(doc) {
            Some(position) => {
                surface.place(self.handle, position);
                // No watch means no target to judge by: keep it interactive
                let visible = gate.verdict(&self.key).unwrap_or(true);
                surface.set_faded(self.handle, !visible);
            }
            None => surface.hide(self.handle),
        }
    }
}

/// Outcome of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub placed: usize,
    pub hidden: usize,
    pub retargeted: usize,
}

#[derive(Debug, Default)]
pub struct PositionReconciler {
    pending: Option<PendingPass>,
    dropped: u64,
    passes: u64,
}

impl PositionReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a pass on the next frame.
    ///
    /// Returns `true` only when this call scheduled a new pass; otherwise the
    /// trigger was absorbed by the pass already pending.
    pub fn request(&mut self, trigger: Trigger) -> bool {
        let structural = trigger == Trigger::Structural;
        match self.pending.as_mut() {
            Some(pending) => {
                pending.reresolve |= structural;
                self.dropped += 1;
                false
            }
            None => {
                self.pending = Some(PendingPass {
                    reresolve: structural,
                });
                true
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the pending pass, leaving nothing scheduled
    pub fn take(&mut self) -> Option<PendingPass> {
        self.pending.take()
    }

    /// Triggers absorbed by an already-pending pass
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Passes executed so far
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Execute one pass over `overlays`
    pub fn run_pass<'a, D, S, I>(
        &mut self,
        pass: PendingPass,
        doc: &D,
        surface: &mut S,
        gate: &mut VisibilityGate,
        overlays: I,
    ) -> PassReport
    where
        D: Document + ?Sized,
        S: OverlaySurface + ?Sized,
        I: IntoIterator<Item = &'a mut TrackedOverlay>,
    {
        let mut overlays: Vec<&mut TrackedOverlay> = overlays.into_iter().collect();
        let mut report = PassReport::default();

        // Structural passes re-resolve everyone; other passes only overlays
        // whose target went away
        for overlay in overlays.iter_mut() {
            if (pass.reresolve || overlay.target_is_stale(doc)) && overlay.retarget(doc, gate) {
                report.retargeted += 1;
            }
        }

        gate.poll(doc);

        for overlay in overlays.iter() {
            if overlay.position(doc).is_some() {
                report.placed += 1;
            } else {
                report.hidden += 1;
            }
            overlay.apply(doc, surface, gate);
        }

        self.passes += 1;
        debug!(
            reresolve = pass.reresolve,
            placed = report.placed,
            hidden = report.hidden,
            retargeted = report.retargeted,
            "Position pass complete"
        );
        report
    }
}
