//! Operation log — per-room committed history with undo/redo stacks.
//!
//! DESIGN
//! ======
//! Two stacks: `committed` (oldest first) and `undone` (most recently undone
//! last). Undo and redo move whole operations between them. Appending a new
//! operation drops the redo chain; history never branches.
//!
//! Undo is global for the room: it pops whatever was committed last,
//! regardless of author. The log knows nothing about rooms or participants.

use crate::operation::DrawingOperation;

#[derive(Debug, Default)]
pub struct OperationLog {
    committed: Vec<DrawingOperation>,
    undone: Vec<DrawingOperation>,
}

impl OperationLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, op: DrawingOperation) {
        self.committed.push(op);
        self.undone.clear();
    }

    /// Move the last committed operation onto the redo stack.
    /// `None` means there was nothing to undo.
    pub fn undo(&mut self) -> Option<DrawingOperation> {
        let op = self.committed.pop()?;
        self.undone.push(op.clone());
        Some(op)
    }

    /// Reinstate the most recently undone operation.
    /// `None` means there was nothing to redo.
    pub fn redo(&mut self) -> Option<DrawingOperation> {
        let op = self.undone.pop()?;
        self.committed.push(op.clone());
        Some(op)
    }

    pub fn clear(&mut self) {
        self.committed.clear();
        self.undone.clear();
    }

    /// Committed operations, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> &[DrawingOperation] {
        &self.committed
    }

    #[must_use]
    pub fn undone(&self) -> &[DrawingOperation] {
        &self.undone
    }

    /// Redo stack depth, for diagnostics.
    #[must_use]
    pub fn redo_stack_size(&self) -> usize {
        self.undone.len()
    }
}

#[cfg(test)]
#[path = "operation_log_test.rs"]
mod tests;
