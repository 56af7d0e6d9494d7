//! Drawing operations — the atomic unit of a room's shared history.
//!
//! DESIGN
//! ======
//! A `DrawingOperation` is built from an `OperationDraft` (the payload of an
//! inbound DRAW message) once the server has stamped it with an author and a
//! timestamp. After that it is never edited; undo/redo move it between stacks
//! as a whole.
//!
//! Stroke tools (brush, eraser) carry an ordered point list. Shape tools carry
//! exactly one `{type, start, end}` descriptor, wrapped in a one-element array
//! on the wire.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolError;

/// Opaque participant identifier chosen by the client.
pub type ParticipantId = String;

// =============================================================================
// GEOMETRY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Brush,
    Eraser,
    Rectangle,
    Square,
    Circle,
    Triangle,
}

impl Tool {
    /// Shape tools are committed as a single bounding descriptor.
    #[must_use]
    pub fn is_shape(self) -> bool {
        !matches!(self, Tool::Brush | Tool::Eraser)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Two corners bounding a shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapeDescriptor {
    #[serde(rename = "type", alias = "tool")]
    pub tool: Tool,
    pub start: Point,
    pub end: Point,
}

/// Geometry of an operation. Untagged: the JSON shape decides the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Points {
    Stroke(Vec<Point>),
    Shape([ShapeDescriptor; 1]),
}

// =============================================================================
// DRAFT
// =============================================================================

/// Client-supplied fields of a DRAW message, before the server stamps it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OperationDraft {
    pub tool: Tool,
    pub color: String,
    pub width: f64,
    pub points: Points,
}

impl OperationDraft {
    /// Check the draft against the operation data model.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidOperation` when the width is not a
    /// positive number, a stroke has no points, the geometry kind does not
    /// match the tool, or a shape descriptor names a different tool.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !self.width.is_finite() || self.width <= 0.0 {
            return Err(ProtocolError::InvalidOperation(format!("width must be positive, got {}", self.width)));
        }
        match (&self.points, self.tool.is_shape()) {
            (Points::Stroke(points), false) if points.is_empty() => {
                Err(ProtocolError::InvalidOperation("stroke requires at least one point".into()))
            }
            (Points::Shape([shape]), true) if shape.tool != self.tool => Err(ProtocolError::InvalidOperation(
                format!("descriptor type {:?} does not match tool {:?}", shape.tool, self.tool),
            )),
            (Points::Stroke(_), false) | (Points::Shape(_), true) => Ok(()),
            (Points::Stroke(_), true) => {
                Err(ProtocolError::InvalidOperation(format!("{:?} requires a shape descriptor", self.tool)))
            }
            (Points::Shape(_), false) => {
                Err(ProtocolError::InvalidOperation(format!("{:?} requires a point sequence", self.tool)))
            }
        }
    }

    /// Stamp the draft with its author and commit time.
    #[must_use]
    pub fn commit(self, author_id: ParticipantId, timestamp: i64) -> DrawingOperation {
        DrawingOperation {
            author_id,
            tool: self.tool,
            color: self.color,
            stroke_width: self.width,
            points: self.points,
            timestamp,
        }
    }
}

// =============================================================================
// OPERATION
// =============================================================================

/// One committed contribution to the canvas.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawingOperation {
    #[serde(rename = "userId")]
    pub author_id: ParticipantId,
    pub tool: Tool,
    pub color: String,
    #[serde(rename = "width")]
    pub stroke_width: f64,
    pub points: Points,
    /// Milliseconds since Unix epoch, non-decreasing within a room.
    pub timestamp: i64,
}

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "operation_test.rs"]
mod tests;
