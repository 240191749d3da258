//! Live overlay placement: coalesced position passes and visibility gating

pub mod positions;
pub mod visibility;

pub use positions::{PassReport, PendingPass, PositionReconciler, TrackedOverlay, Trigger};
pub use visibility::{Transition, VisibilityGate, DEFAULT_MARGIN_PX};
