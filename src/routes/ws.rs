//! WebSocket handler — socket I/O around a `Session`.
//!
//! DESIGN
//! ======
//! On upgrade, allocates a connection id and an outbound queue, then enters a
//! `select!` loop:
//! - Incoming client text → `Session::handle_text`
//! - Queued messages (INIT_STATE and room broadcasts) → forwarded to the
//!   socket in enqueue order
//!
//! Inbound messages are handled one at a time, to completion, in arrival
//! order. The queue's sending half lives in the room's participant entry, so
//! rooms never touch the socket.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → session starts unjoined
//! 2. Client sends JOIN → INIT_STATE queued, USER_JOINED to peers
//! 3. Client frames → session → room mutations + fan-out
//! 4. Close or socket error → `Session::close` → USER_LEFT to peers

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::broadcast::Outbound;
use crate::services::session::Session;
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    let (outbox, mut outbound_rx) = mpsc::channel::<Outbound>(state.config.outbound_queue);
    let mut session = Session::new(state.registry.clone(), connection_id, outbox, state.config.default_room.clone());

    info!(%connection_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(%connection_id, error = %e, "ws: receive failed");
                        break;
                    }
                };
                match msg {
                    Message::Text(text) => session.handle_text(text.as_str()).await,
                    Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                        Ok(text) => session.handle_text(text).await,
                        Err(e) => warn!(%connection_id, error = %e, "ws: dropped non-utf8 binary message"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(payload) = outbound_rx.recv() => {
                if send_payload(&mut socket, &payload).await.is_err() {
                    break;
                }
            }
        }
    }

    session.close().await;
    info!(%connection_id, "ws: client disconnected");
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_payload(socket: &mut WebSocket, payload: &str) -> Result<(), axum::Error> {
    socket.send(Message::Text(payload.to_owned().into())).await
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
