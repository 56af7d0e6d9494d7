//! Room registry — live rooms, their participants, and their drawing logs.
//!
//! DESIGN
//! ======
//! The registry maps room ids to `Arc<Mutex<Room>>`. A room is created on
//! first `resolve` and removed the moment its last participant leaves, taking
//! its operation log with it. Nothing is persisted.
//!
//! LOCKING
//! =======
//! Each room has its own mutex so unrelated rooms never contend. The registry
//! map sits behind an `RwLock` that is only held to look up, create, or
//! remove an entry, and never while waiting on a room. Removal locks the
//! room first, then takes the map write lock only if the room emptied, marks
//! it `retired`, and drops it from the map. `with_room` re-resolves if it
//! locked a retired room, so nothing is ever written to a room that has left
//! the map.
//!
//! Sessions mutate through `with_member`, which never creates a room and
//! refuses a caller whose entry is gone or owned by a newer connection.
//!
//! Compound steps (commit then broadcast, undo then snapshot then broadcast)
//! run inside one `with_room` closure, which keeps per-room commit order and
//! broadcast order identical.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::operation::{DrawingOperation, ParticipantId, now_ms};
use crate::protocol::{ServerMessage, UserSummary};
use crate::services::broadcast::{self, FanOut, OutboundTx};
use crate::services::operation_log::OperationLog;

pub type RoomId = String;

/// Identifies one transport connection. Participant ids are client-chosen and
/// may be reused across reconnects; connection ids never are.
pub type ConnectionId = Uuid;

pub type RoomHandle = Arc<Mutex<Room>>;

// =============================================================================
// PARTICIPANT
// =============================================================================

/// Presence entry for one connected user. The room owns the entry; `outbox`
/// is a non-owning handle to the connection's outbound queue.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub color: String,
    pub connection_id: ConnectionId,
    pub joined_at: i64,
    pub outbox: OutboundTx,
}

impl Participant {
    #[must_use]
    pub fn new(
        id: ParticipantId,
        display_name: String,
        color: String,
        connection_id: ConnectionId,
        outbox: OutboundTx,
    ) -> Self {
        Self { id, display_name, color, connection_id, joined_at: now_ms(), outbox }
    }

    #[must_use]
    pub fn summary(&self) -> UserSummary {
        UserSummary { id: self.id.clone(), name: self.display_name.clone() }
    }
}

/// How `add_participant` treated an incoming entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New participant id in this room.
    Inserted,
    /// Same id, same connection; entry refreshed in place.
    Refreshed,
    /// Same id from a different connection; the stale entry was replaced.
    Replaced,
}

/// Outcome of removing a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// Removed; other participants remain.
    Left,
    /// Removed and the room emptied, so it was destroyed.
    RoomDestroyed,
    /// The entry belongs to a newer connection and was left in place.
    Superseded,
    /// No such room or participant.
    Absent,
}

/// Full-state view of a room's canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasSnapshot {
    pub operations: Vec<DrawingOperation>,
    pub redo_stack_size: usize,
}

// =============================================================================
// ROOM
// =============================================================================

#[derive(Debug)]
pub struct Room {
    room_id: RoomId,
    participants: HashMap<ParticipantId, Participant>,
    log: OperationLog,
    last_timestamp: i64,
    retired: bool,
}

impl Room {
    fn new(room_id: &str) -> Self {
        Self {
            room_id: room_id.to_owned(),
            participants: HashMap::new(),
            log: OperationLog::new(),
            last_timestamp: 0,
            retired: false,
        }
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn add_participant(&mut self, participant: Participant) -> Admission {
        match self.participants.entry(participant.id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(participant);
                Admission::Inserted
            }
            Entry::Occupied(mut slot) => {
                let admission = if slot.get().connection_id == participant.connection_id {
                    Admission::Refreshed
                } else {
                    Admission::Replaced
                };
                slot.insert(participant);
                admission
            }
        }
    }

    /// Remove `participant_id` unless its entry belongs to a connection other
    /// than `connection_id`. Never reports `RoomDestroyed`; that is the
    /// registry's call.
    pub fn release(&mut self, participant_id: &str, connection_id: Option<ConnectionId>) -> Departure {
        match (self.participants.get(participant_id), connection_id) {
            (None, _) => return Departure::Absent,
            (Some(current), Some(conn)) if current.connection_id != conn => return Departure::Superseded,
            _ => {}
        }
        self.participants.remove(participant_id);
        Departure::Left
    }

    /// Whether `participant_id` is registered here by `connection_id`.
    #[must_use]
    pub fn is_member(&self, participant_id: &str, connection_id: ConnectionId) -> bool {
        self.participants.get(participant_id).is_some_and(|p| p.connection_id == connection_id)
    }

    /// `{id, name}` for everyone present. Order is unspecified.
    #[must_use]
    pub fn list_participants(&self) -> Vec<UserSummary> {
        self.participants.values().map(Participant::summary).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Deliver to every participant except `exclude`.
    pub fn broadcast(&self, message: &ServerMessage, exclude: Option<&str>) -> FanOut {
        let targets = self
            .participants
            .values()
            .filter(|p| exclude != Some(p.id.as_str()))
            .map(|p| (p.id.as_str(), &p.outbox));
        broadcast::fan_out(targets, message)
    }

    /// Commit time for the next operation; never earlier than the previous one.
    pub fn next_timestamp(&mut self) -> i64 {
        self.last_timestamp = self.last_timestamp.max(now_ms());
        self.last_timestamp
    }

    pub fn append_operation(&mut self, op: DrawingOperation) {
        self.log.append(op);
    }

    pub fn undo(&mut self) -> Option<DrawingOperation> {
        self.log.undo()
    }

    pub fn redo(&mut self) -> Option<DrawingOperation> {
        self.log.redo()
    }

    pub fn clear_canvas(&mut self) {
        self.log.clear();
    }

    #[must_use]
    pub fn operations(&self) -> &[DrawingOperation] {
        self.log.snapshot()
    }

    #[must_use]
    pub fn snapshot(&self) -> CanvasSnapshot {
        CanvasSnapshot { operations: self.log.snapshot().to_vec(), redo_stack_size: self.log.redo_stack_size() }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, RoomHandle>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing room for `room_id`, or a fresh empty one.
    pub async fn resolve(&self, room_id: &str) -> RoomHandle {
        if let Some(handle) = self.rooms.read().await.get(room_id) {
            return Arc::clone(handle);
        }

        let mut rooms = self.rooms.write().await;
        let handle = rooms.entry(room_id.to_owned()).or_insert_with(|| {
            info!(%room_id, "room created");
            Arc::new(Mutex::new(Room::new(room_id)))
        });
        Arc::clone(handle)
    }

    /// Run `f` against the live room for `room_id` under its lock.
    pub async fn with_room<R>(&self, room_id: &str, f: impl FnOnce(&mut Room) -> R) -> R {
        let mut room = self.lock_live(room_id).await;
        f(&mut room)
    }

    async fn lock_live(&self, room_id: &str) -> OwnedMutexGuard<Room> {
        loop {
            let room = self.resolve(room_id).await.lock_owned().await;
            if !room.retired {
                return room;
            }
        }
    }

    /// Run `f` against `room_id` only while `participant_id` is registered
    /// there by `connection_id`. Never creates a room; `None` means the
    /// caller no longer holds that entry.
    pub async fn with_member<R>(
        &self,
        room_id: &str,
        participant_id: &str,
        connection_id: ConnectionId,
        f: impl FnOnce(&mut Room) -> R,
    ) -> Option<R> {
        let handle = self.rooms.read().await.get(room_id).map(Arc::clone)?;
        let mut room = handle.lock().await;
        if room.retired || !room.is_member(participant_id, connection_id) {
            return None;
        }
        Some(f(&mut room))
    }

    /// Whether a room is currently live. Never creates one.
    pub async fn contains(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn add_participant(&self, room_id: &str, participant: Participant) -> Admission {
        self.with_room(room_id, |room| room.add_participant(participant)).await
    }

    /// Remove a participant, destroying the room if it empties.
    pub async fn remove_participant(&self, room_id: &str, participant_id: &str) -> Departure {
        self.remove_where(room_id, participant_id, None, false).await
    }

    /// Remove the participant registered by `connection_id` and tell the
    /// remaining participants. A newer connection's entry is left alone.
    pub async fn depart(&self, room_id: &str, participant_id: &str, connection_id: ConnectionId) -> Departure {
        self.remove_where(room_id, participant_id, Some(connection_id), true).await
    }

    async fn remove_where(
        &self,
        room_id: &str,
        participant_id: &str,
        connection_id: Option<ConnectionId>,
        notify: bool,
    ) -> Departure {
        let Some(handle) = self.rooms.read().await.get(room_id).map(Arc::clone) else {
            return Departure::Absent;
        };
        let mut room = handle.lock().await;
        if room.retired {
            return Departure::Absent;
        }

        match room.release(participant_id, connection_id) {
            Departure::Left => {}
            Departure::Superseded => {
                info!(%room_id, participant_id, "departure from superseded connection ignored");
                return Departure::Superseded;
            }
            other => return other,
        }
        info!(%room_id, participant_id, remaining = room.participants.len(), "participant left room");

        // Room lock before map lock; nothing takes them in the other order.
        if room.is_empty() {
            let mut rooms = self.rooms.write().await;
            room.retired = true;
            if rooms.get(room_id).is_some_and(|current| Arc::ptr_eq(current, &handle)) {
                rooms.remove(room_id);
            }
            info!(%room_id, "room destroyed");
            return Departure::RoomDestroyed;
        }

        if notify {
            let notice = ServerMessage::UserLeft { user_id: participant_id.to_owned(), users: room.list_participants() };
            room.broadcast(&notice, None);
        }
        Departure::Left
    }

    /// Participants of `room_id`; empty for an unknown room.
    pub async fn list_participants(&self, room_id: &str) -> Vec<UserSummary> {
        let Some(handle) = self.rooms.read().await.get(room_id).map(Arc::clone) else {
            return Vec::new();
        };
        handle.lock().await.list_participants()
    }

    /// Deliver to a room's participants. An unknown room has nobody to reach.
    pub async fn broadcast(&self, room_id: &str, message: &ServerMessage, exclude: Option<&str>) -> FanOut {
        let Some(handle) = self.rooms.read().await.get(room_id).map(Arc::clone) else {
            return FanOut::default();
        };
        handle.lock().await.broadcast(message, exclude)
    }

    pub async fn append_operation(&self, room_id: &str, op: DrawingOperation) {
        self.with_room(room_id, |room| room.append_operation(op)).await;
    }

    pub async fn undo(&self, room_id: &str) -> Option<DrawingOperation> {
        self.with_room(room_id, Room::undo).await
    }

    pub async fn redo(&self, room_id: &str) -> Option<DrawingOperation> {
        self.with_room(room_id, Room::redo).await
    }

    pub async fn clear_canvas(&self, room_id: &str) {
        self.with_room(room_id, Room::clear_canvas).await;
    }

    pub async fn snapshot(&self, room_id: &str) -> CanvasSnapshot {
        self.with_room(room_id, |room| room.snapshot()).await
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
