//! Wire protocol — JSON messages exchanged over the WebSocket.
//!
//! DESIGN
//! ======
//! Every message is a flat JSON object discriminated by `type`. Inbound text
//! is parsed in two steps so unknown types can be told apart from malformed
//! payloads of a known type; both are logged and dropped by the session, and
//! neither ever produces a reply.

use serde::{Deserialize, Serialize};

use crate::operation::{DrawingOperation, OperationDraft, ParticipantId, Points, Tool};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message has no type")]
    MissingType,
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

// =============================================================================
// CLIENT → SERVER
// =============================================================================

/// Types a client may send. Anything else is `ProtocolError::UnknownType`.
pub const CLIENT_TYPES: [&str; 7] = ["JOIN", "DRAW_START", "DRAW", "CURSOR", "UNDO", "REDO", "CLEAR"];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Join {
        user_id: ParticipantId,
        user_name: Option<String>,
        room: Option<String>,
        color: Option<String>,
    },
    DrawStart {
        x: f64,
        y: f64,
        color: String,
        width: f64,
        tool: Tool,
    },
    Draw(OperationDraft),
    Cursor {
        x: f64,
        y: f64,
    },
    Undo,
    Redo,
    Clear,
}

impl ClientMessage {
    /// Parse one inbound text message.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` for invalid JSON or a bad payload of a known type,
    /// `MissingType` when there is no string `type`, and `UnknownType` for an
    /// unrecognized discriminator.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let Some(kind) = value.get("type").and_then(serde_json::Value::as_str) else {
            return Err(ProtocolError::MissingType);
        };
        if !CLIENT_TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_owned()));
        }
        let message = serde_json::from_value(value)?;
        Ok(message)
    }

    /// Discriminator as it appears on the wire, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "JOIN",
            Self::DrawStart { .. } => "DRAW_START",
            Self::Draw(_) => "DRAW",
            Self::Cursor { .. } => "CURSOR",
            Self::Undo => "UNDO",
            Self::Redo => "REDO",
            Self::Clear => "CLEAR",
        }
    }
}

// =============================================================================
// SERVER → CLIENT
// =============================================================================

/// Presence entry as listed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: ParticipantId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    InitState {
        operations: Vec<DrawingOperation>,
        users: Vec<UserSummary>,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined {
        user_id: ParticipantId,
        user_name: String,
        color: String,
        users: Vec<UserSummary>,
    },
    #[serde(rename_all = "camelCase")]
    UserLeft {
        user_id: ParticipantId,
        users: Vec<UserSummary>,
    },
    #[serde(rename_all = "camelCase")]
    DrawStart {
        user_id: ParticipantId,
        x: f64,
        y: f64,
        color: String,
        width: f64,
        tool: Tool,
    },
    #[serde(rename_all = "camelCase")]
    Draw {
        user_id: ParticipantId,
        points: Points,
        color: String,
        width: f64,
        tool: Tool,
    },
    #[serde(rename_all = "camelCase")]
    Cursor {
        user_id: ParticipantId,
        x: f64,
        y: f64,
    },
    Undo {
        operation: DrawingOperation,
        operations: Vec<DrawingOperation>,
    },
    Redo {
        operation: DrawingOperation,
        operations: Vec<DrawingOperation>,
    },
    Clear,
}

impl ServerMessage {
    /// Peer notice for a freshly committed operation. The timestamp stays
    /// server-side; it only surfaces again through full-state snapshots.
    #[must_use]
    pub fn draw(op: &DrawingOperation) -> Self {
        Self::Draw {
            user_id: op.author_id.clone(),
            points: op.points.clone(),
            color: op.color.clone(),
            width: op.stroke_width,
            tool: op.tool,
        }
    }
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
