//! Session — per-connection protocol state machine.
//!
//! DESIGN
//! ======
//! A session starts `Unjoined`. The first accepted message must be JOIN,
//! which binds it to a room and participant id. From then on each inbound
//! message becomes one `with_member` step against the registry: mutate the
//! room's log, then fan out, all under the room lock.
//!
//! The session never writes to the socket. Everything it emits, INIT_STATE
//! included, goes through participant outbound queues, so a connection sees
//! its snapshot in order with the room broadcasts around it.
//!
//! ERROR HANDLING
//! ==============
//! Malformed payloads, unknown types, invalid operations, and anything other
//! than JOIN before joining are logged and dropped. Clients never receive an
//! error message; the connection stays open.
//!
//! A session whose entry was taken over by a newer connection with the same
//! participant id is no longer a member. Its messages are dropped and it
//! falls back to `Unjoined`; it never recreates or touches the room.
//!
//! LIFECYCLE
//! =========
//! `Unjoined` → `Joined` → `Closed`. `close` removes the participant from its
//! room (notifying whoever remains) and is terminal.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::operation::{OperationDraft, ParticipantId};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::services::broadcast::{self, OutboundTx};
use crate::services::room::{Admission, ConnectionId, Departure, Participant, Room, RoomId, RoomRegistry};

const DEFAULT_USER_NAME: &str = "Anonymous";
const DEFAULT_USER_COLOR: &str = "#000000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unjoined,
    Joined { room_id: RoomId, participant_id: ParticipantId },
    Closed,
}

pub struct Session {
    registry: Arc<RoomRegistry>,
    connection_id: ConnectionId,
    outbox: OutboundTx,
    default_room: String,
    state: SessionState,
}

impl Session {
    #[must_use]
    pub fn new(
        registry: Arc<RoomRegistry>,
        connection_id: ConnectionId,
        outbox: OutboundTx,
        default_room: impl Into<String>,
    ) -> Self {
        Self { registry, connection_id, outbox, default_room: default_room.into(), state: SessionState::Unjoined }
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Parse and apply one inbound text message.
    pub async fn handle_text(&mut self, text: &str) {
        if self.state == SessionState::Closed {
            return;
        }
        match ClientMessage::parse(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => warn!(connection_id = %self.connection_id, error = %e, "session: dropped inbound message"),
        }
    }

    /// Apply one parsed message.
    pub async fn handle(&mut self, message: ClientMessage) {
        if self.state == SessionState::Closed {
            return;
        }
        let kind = message.kind();
        debug!(connection_id = %self.connection_id, kind, "session: recv");

        let message = match message {
            ClientMessage::Join { user_id, user_name, room, color } => {
                self.join(user_id, user_name, room, color).await;
                return;
            }
            other => other,
        };

        let SessionState::Joined { room_id, participant_id } = &self.state else {
            warn!(connection_id = %self.connection_id, kind, "session: message before join ignored");
            return;
        };
        let room_id = room_id.clone();
        let participant_id = participant_id.clone();

        let member = match message {
            ClientMessage::DrawStart { x, y, color, width, tool } => {
                let notice = ServerMessage::DrawStart { user_id: participant_id.clone(), x, y, color, width, tool };
                self.member(&room_id, &participant_id, |room| {
                    room.broadcast(&notice, Some(&participant_id));
                })
                .await
            }
            ClientMessage::Draw(draft) => {
                if let Err(e) = draft.validate() {
                    warn!(connection_id = %self.connection_id, %room_id, error = %e, "session: dropped draw");
                    return;
                }
                self.draw(&room_id, &participant_id, draft).await
            }
            ClientMessage::Cursor { x, y } => {
                let notice = ServerMessage::Cursor { user_id: participant_id.clone(), x, y };
                self.member(&room_id, &participant_id, |room| {
                    room.broadcast(&notice, Some(&participant_id));
                })
                .await
            }
            ClientMessage::Undo => self.undo(&room_id, &participant_id).await,
            ClientMessage::Redo => self.redo(&room_id, &participant_id).await,
            ClientMessage::Clear => self.clear(&room_id, &participant_id).await,
            ClientMessage::Join { .. } => Some(()),
        };

        if member.is_none() {
            warn!(
                connection_id = %self.connection_id,
                %room_id,
                %participant_id,
                kind,
                "session: no longer a member, message dropped"
            );
            self.state = SessionState::Unjoined;
        }
    }

    /// Leave the current room, if any, and stop processing messages.
    pub async fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Joined { room_id, participant_id } = state {
            let departure = self.registry.depart(&room_id, &participant_id, self.connection_id).await;
            info!(connection_id = %self.connection_id, %room_id, %participant_id, ?departure, "session: closed");
        }
    }

    async fn member<R>(&self, room_id: &str, participant_id: &str, f: impl FnOnce(&mut Room) -> R) -> Option<R> {
        self.registry.with_member(room_id, participant_id, self.connection_id, f).await
    }

    // =========================================================================
    // JOIN
    // =========================================================================

    /// Bind this connection to a room and queue the full canvas state for it.
    ///
    /// A repeat JOIN for the same room and participant id re-registers in
    /// place. A repeat JOIN for another room leaves the previous one first.
    /// A new id in the same room is admitted and the old id released under
    /// one room lock, so the room never empties and keeps its history.
    async fn join(
        &mut self,
        user_id: ParticipantId,
        user_name: Option<String>,
        room: Option<String>,
        color: Option<String>,
    ) {
        let room_id = room.filter(|r| !r.is_empty()).unwrap_or_else(|| self.default_room.clone());
        let user_name = user_name.unwrap_or_else(|| DEFAULT_USER_NAME.to_owned());
        let color = color.unwrap_or_else(|| DEFAULT_USER_COLOR.to_owned());

        let previous = match std::mem::replace(&mut self.state, SessionState::Unjoined) {
            SessionState::Joined { room_id: old_room, participant_id: old_id } => Some((old_room, old_id)),
            _ => None,
        };
        let mut renamed_from = None;
        if let Some((old_room, old_id)) = previous {
            if old_room != room_id {
                self.registry.depart(&old_room, &old_id, self.connection_id).await;
            } else if old_id != user_id {
                renamed_from = Some(old_id);
            }
        }

        let connection_id = self.connection_id;
        let outbox = &self.outbox;
        let participant =
            Participant::new(user_id.clone(), user_name.clone(), color.clone(), connection_id, outbox.clone());
        let admission = self
            .registry
            .with_room(&room_id, |room| {
                let admission = room.add_participant(participant);

                if let Some(old_id) = &renamed_from {
                    if room.release(old_id, Some(connection_id)) == Departure::Left {
                        let notice = ServerMessage::UserLeft { user_id: old_id.clone(), users: room.list_participants() };
                        room.broadcast(&notice, Some(&user_id));
                    }
                }

                let users = room.list_participants();
                let notice = ServerMessage::UserJoined {
                    user_id: user_id.clone(),
                    user_name,
                    color,
                    users: users.clone(),
                };
                room.broadcast(&notice, Some(&user_id));

                let init = ServerMessage::InitState { operations: room.operations().to_vec(), users };
                broadcast::send_to(&user_id, outbox, &init);
                admission
            })
            .await;

        if admission == Admission::Replaced {
            info!(%room_id, participant_id = %user_id, "replaced participant entry from an older connection");
        }
        info!(%connection_id, %room_id, participant_id = %user_id, ?admission, "session: joined");

        self.state = SessionState::Joined { room_id, participant_id: user_id };
    }

    // =========================================================================
    // DRAWING
    // =========================================================================

    async fn draw(&self, room_id: &str, participant_id: &str, draft: OperationDraft) -> Option<()> {
        self.member(room_id, participant_id, |room| {
            let op = draft.commit(participant_id.to_owned(), room.next_timestamp());
            let notice = ServerMessage::draw(&op);
            room.append_operation(op);
            room.broadcast(&notice, Some(participant_id));
        })
        .await
    }

    async fn undo(&self, room_id: &str, participant_id: &str) -> Option<()> {
        self.member(room_id, participant_id, |room| {
            let Some(operation) = room.undo() else {
                debug!(%room_id, "session: nothing to undo");
                return;
            };
            let notice = ServerMessage::Undo { operation, operations: room.operations().to_vec() };
            room.broadcast(&notice, None);
        })
        .await
    }

    async fn redo(&self, room_id: &str, participant_id: &str) -> Option<()> {
        self.member(room_id, participant_id, |room| {
            let Some(operation) = room.redo() else {
                debug!(%room_id, "session: nothing to redo");
                return;
            };
            let notice = ServerMessage::Redo { operation, operations: room.operations().to_vec() };
            room.broadcast(&notice, None);
        })
        .await
    }

    async fn clear(&self, room_id: &str, participant_id: &str) -> Option<()> {
        self.member(room_id, participant_id, |room| {
            room.clear_canvas();
            room.broadcast(&ServerMessage::Clear, None);
        })
        .await
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
