//! Cross-context control messages
//!
//! The wire shape is JSON tagged by `action`, with camelCase field names:
//!
//! ```json
//! {"action": "createNoteAtPosition", "x": 100, "y": 50, "noteData": {"text": "hi"}}
//! {"action": "deleteNote", "noteId": "note-1"}
//! ```

use crate::annotations::{NotePatch, StylePatch};
use serde::{Deserialize, Serialize};

/// A request from a control surface to the on-page agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlMessage {
    StartPlacement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        style: Option<StylePatch>,
    },
    CancelPlacement,
    #[serde(rename_all = "camelCase")]
    CreateNoteAtPosition {
        x: f64,
        y: f64,
        #[serde(default)]
        note_data: NotePatch,
    },
    #[serde(rename_all = "camelCase")]
    DeleteNote { note_id: String },
    #[serde(rename_all = "camelCase")]
    UpdateNote {
        note_id: String,
        #[serde(default)]
        note_data: NotePatch,
    },
}

impl ControlMessage {
    pub fn action(&self) -> &'static str {
        match self {
            Self::StartPlacement { .. } => "startPlacement",
            Self::CancelPlacement => "cancelPlacement",
            Self::CreateNoteAtPosition { .. } => "createNoteAtPosition",
            Self::DeleteNote { .. } => "deleteNote",
            Self::UpdateNote { .. } => "updateNote",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            note_id: None,
            error: None,
        }
    }

    pub fn created(note_id: impl Into<String>) -> Self {
        Self {
            note_id: Some(note_id.into()),
            ..Self::ok()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            note_id: None,
            error: Some(error.into()),
        }
    }
}

/// Unsolicited notifications from the agent back to control surfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum AgentEvent {
    #[serde(rename_all = "camelCase")]
    NoteCreated { note_id: String },
}
