//! Placement mode: waiting for the click that sites a new note

use super::models::StylePatch;
use crate::dom::Point;

/// Armed placement stays armed until a qualifying click or a cancel; it has
/// no timeout.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Placement {
    #[default]
    Idle,
    Armed {
        style: Option<StylePatch>,
    },
}

/// What a page click means while placement is considered
#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    /// Not armed: the click belongs to the page
    Ignored,
    /// Click landed on annotation chrome; stay armed
    OnOverlay,
    /// Commit a note here with this style
    Commit { at: Point, style: Option<StylePatch> },
}

impl Placement {
    pub fn is_armed(&self) -> bool {
        matches!(self, Placement::Armed { .. })
    }

    /// Arm (or re-arm with a new style)
    pub fn arm(&mut self, style: Option<StylePatch>) {
        *self = Placement::Armed { style };
    }

    /// Disarm; returns whether it was armed
    pub fn cancel(&mut self) -> bool {
        let was_armed = self.is_armed();
        *self = Placement::Idle;
        was_armed
    }

    /// Feed a click. A commit disarms.
    pub fn click(&mut self, at: Point, on_overlay: bool) -> ClickOutcome {
        if !self.is_armed() {
            return ClickOutcome::Ignored;
        }
        if on_overlay {
            return ClickOutcome::OnOverlay;
        }
        match std::mem::take(self) {
            Placement::Armed { style } => ClickOutcome::Commit { at, style },
            Placement::Idle => ClickOutcome::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_while_idle_is_ignored() {
        let mut placement = Placement::default();
        assert_eq!(placement.click(Point::new(1.0, 1.0), false), ClickOutcome::Ignored);
    }

    #[test]
    fn test_overlay_click_keeps_armed() {
        let mut placement = Placement::default();
        placement.arm(None);
        assert_eq!(placement.click(Point::new(1.0, 1.0), true), ClickOutcome::OnOverlay);
        assert!(placement.is_armed());
    }

    #[test]
    fn test_commit_disarms() {
        let mut placement = Placement::default();
        let style = StylePatch {
            background: Some("#ffffff".into()),
            ..StylePatch::default()
        };
        placement.arm(Some(style.clone()));
        let outcome = placement.click(Point::new(5.0, 6.0), false);
        assert_eq!(
            outcome,
            ClickOutcome::Commit {
                at: Point::new(5.0, 6.0),
                style: Some(style)
            }
        );
        assert!(!placement.is_armed());
        assert!(!placement.cancel());
    }
}
