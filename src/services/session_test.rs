use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::*;
use crate::operation::{Point, Points};
use crate::services::broadcast::Outbound;
use crate::state::test_helpers::{assert_no_message, recv_json};

type Queue = mpsc::Receiver<Outbound>;

fn session(registry: &Arc<RoomRegistry>) -> (Session, Queue) {
    let (tx, rx) = mpsc::channel(32);
    (Session::new(Arc::clone(registry), Uuid::new_v4(), tx, "default"), rx)
}

async fn send(session: &mut Session, message: Value) {
    session.handle_text(&message.to_string()).await;
}

/// Send JOIN and return the INIT_STATE it queues.
async fn join(session: &mut Session, rx: &mut Queue, user_id: &str, room: &str) -> Value {
    send(session, json!({"type": "JOIN", "userId": user_id, "userName": user_id, "room": room})).await;
    let init = recv_json(rx).await;
    assert_eq!(init["type"], "INIT_STATE");
    init
}

fn brush(points: &[[f64; 2]]) -> Value {
    let points: Vec<Value> = points.iter().map(|[x, y]| json!({"x": x, "y": y})).collect();
    json!({"type": "DRAW", "tool": "brush", "color": "#222222", "width": 4, "points": points})
}

fn rectangle() -> Value {
    json!({
        "type": "DRAW",
        "tool": "rectangle",
        "color": "#0000ff",
        "width": 2,
        "points": [{"type": "rectangle", "start": {"x": 0, "y": 0}, "end": {"x": 50, "y": 40}}]
    })
}

fn user_ids(users: &Value) -> Vec<String> {
    let mut ids: Vec<String> =
        users.as_array().expect("users array").iter().map(|u| u["id"].as_str().unwrap_or_default().to_owned()).collect();
    ids.sort();
    ids
}

fn joined(room_id: &str, participant_id: &str) -> SessionState {
    SessionState::Joined { room_id: room_id.into(), participant_id: participant_id.into() }
}

// =============================================================================
// JOIN
// =============================================================================

#[tokio::test]
async fn join_queues_init_state() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx) = session(&registry);

    let init = join(&mut alice, &mut rx, "alice", "r1").await;

    assert_eq!(init["operations"], json!([]));
    assert_eq!(user_ids(&init["users"]), ["alice"]);
    assert_eq!(alice.state(), &joined("r1", "alice"));
    assert!(registry.contains("r1").await);
    assert_no_message(&mut rx).await;
}

#[tokio::test]
async fn join_defaults_room_name_and_color() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut watcher, mut watcher_rx) = session(&registry);
    join(&mut watcher, &mut watcher_rx, "watcher", "default").await;

    let (mut anon, mut anon_rx) = session(&registry);
    send(&mut anon, json!({"type": "JOIN", "userId": "anon"})).await;
    assert_eq!(recv_json(&mut anon_rx).await["type"], "INIT_STATE");

    let notice = recv_json(&mut watcher_rx).await;
    assert_eq!(notice["type"], "USER_JOINED");
    assert_eq!(notice["userId"], "anon");
    assert_eq!(notice["userName"], "Anonymous");
    assert_eq!(notice["color"], "#000000");
    assert_eq!(user_ids(&notice["users"]), ["anon", "watcher"]);
}

#[tokio::test]
async fn empty_room_name_falls_back_to_default() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, _rx) = session(&registry);
    send(&mut alice, json!({"type": "JOIN", "userId": "alice", "room": ""})).await;
    assert!(registry.contains("default").await);
}

#[tokio::test]
async fn late_joiner_sees_existing_strokes() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx_a) = session(&registry);
    join(&mut alice, &mut rx_a, "A", "r1").await;
    send(&mut alice, brush(&[[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]])).await;

    let (mut bob, mut rx_b) = session(&registry);
    let init = join(&mut bob, &mut rx_b, "B", "r1").await;

    let operations = init["operations"].as_array().expect("operations array");
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0]["userId"], "A");
    assert_eq!(operations[0]["tool"], "brush");
    assert_eq!(operations[0]["points"].as_array().map(Vec::len), Some(3));
    assert!(operations[0]["timestamp"].as_i64().is_some());
    assert_eq!(user_ids(&init["users"]), ["A", "B"]);
}

#[tokio::test]
async fn join_announces_to_peers_but_not_joiner() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx_a) = session(&registry);
    join(&mut alice, &mut rx_a, "alice", "r1").await;

    let (mut bob, mut rx_b) = session(&registry);
    join(&mut bob, &mut rx_b, "bob", "r1").await;

    let notice = recv_json(&mut rx_a).await;
    assert_eq!(notice["type"], "USER_JOINED");
    assert_eq!(notice["userId"], "bob");
    assert_no_message(&mut rx_b).await;
}

// =============================================================================
// DRAWING
// =============================================================================

#[tokio::test]
async fn draw_reaches_peers_but_not_author() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx_a) = session(&registry);
    let (mut bob, mut rx_b) = session(&registry);
    join(&mut alice, &mut rx_a, "alice", "r1").await;
    join(&mut bob, &mut rx_b, "bob", "r1").await;
    recv_json(&mut rx_a).await;

    send(&mut alice, brush(&[[1.0, 1.0], [2.0, 2.0]])).await;

    let notice = recv_json(&mut rx_b).await;
    assert_eq!(notice["type"], "DRAW");
    assert_eq!(notice["userId"], "alice");
    assert_eq!(notice["tool"], "brush");
    assert_eq!(notice["width"], 4.0);
    assert!(notice.get("timestamp").is_none());
    assert_no_message(&mut rx_a).await;
    assert_eq!(registry.snapshot("r1").await.operations.len(), 1);
}

#[tokio::test]
async fn draw_start_and_cursor_are_relayed_without_commit() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx_a) = session(&registry);
    let (mut bob, mut rx_b) = session(&registry);
    join(&mut alice, &mut rx_a, "alice", "r1").await;
    join(&mut bob, &mut rx_b, "bob", "r1").await;
    recv_json(&mut rx_a).await;

    send(&mut alice, json!({"type": "DRAW_START", "x": 5, "y": 6, "color": "#111111", "width": 3, "tool": "brush"}))
        .await;
    send(&mut alice, json!({"type": "CURSOR", "x": 7.5, "y": 8.5})).await;

    let start = recv_json(&mut rx_b).await;
    assert_eq!(start["type"], "DRAW_START");
    assert_eq!(start["userId"], "alice");
    assert_eq!(start["x"], 5.0);
    let cursor = recv_json(&mut rx_b).await;
    assert_eq!(cursor["type"], "CURSOR");
    assert_eq!(cursor["y"], 8.5);

    assert_no_message(&mut rx_a).await;
    assert!(registry.snapshot("r1").await.operations.is_empty());
}

#[tokio::test]
async fn invalid_draw_is_dropped() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx_a) = session(&registry);
    let (mut bob, mut rx_b) = session(&registry);
    join(&mut alice, &mut rx_a, "alice", "r1").await;
    join(&mut bob, &mut rx_b, "bob", "r1").await;

    send(&mut alice, brush(&[])).await;
    send(&mut alice, json!({"type": "DRAW", "tool": "brush", "color": "#000", "width": 0, "points": [{"x": 1, "y": 1}]}))
        .await;
    send(
        &mut alice,
        json!({
            "type": "DRAW",
            "tool": "circle",
            "color": "#000",
            "width": 2,
            "points": [{"type": "rectangle", "start": {"x": 0, "y": 0}, "end": {"x": 5, "y": 5}}]
        }),
    )
    .await;

    assert_no_message(&mut rx_b).await;
    assert!(registry.snapshot("r1").await.operations.is_empty());
    assert_eq!(alice.state(), &joined("r1", "alice"));
}

// =============================================================================
// UNDO / REDO / CLEAR
// =============================================================================

#[tokio::test]
async fn undo_broadcasts_to_everyone_with_remaining_operations() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx_a) = session(&registry);
    let (mut bob, mut rx_b) = session(&registry);
    join(&mut alice, &mut rx_a, "alice", "r1").await;
    join(&mut bob, &mut rx_b, "bob", "r1").await;
    recv_json(&mut rx_a).await;

    send(&mut alice, rectangle()).await;
    recv_json(&mut rx_b).await;

    send(&mut bob, json!({"type": "UNDO"})).await;

    for rx in [&mut rx_a, &mut rx_b] {
        let notice = recv_json(rx).await;
        assert_eq!(notice["type"], "UNDO");
        assert_eq!(notice["operation"]["tool"], "rectangle");
        assert_eq!(notice["operation"]["points"][0]["type"], "rectangle");
        assert_eq!(notice["operations"], json!([]));
    }
    assert_eq!(registry.snapshot("r1").await.redo_stack_size, 1);

    send(&mut alice, json!({"type": "REDO"})).await;
    for rx in [&mut rx_a, &mut rx_b] {
        let notice = recv_json(rx).await;
        assert_eq!(notice["type"], "REDO");
        assert_eq!(notice["operations"].as_array().map(Vec::len), Some(1));
    }
}

#[tokio::test]
async fn undo_on_empty_log_sends_nothing() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx_a) = session(&registry);
    join(&mut alice, &mut rx_a, "alice", "r1").await;

    send(&mut alice, json!({"type": "UNDO"})).await;
    send(&mut alice, json!({"type": "REDO"})).await;

    assert_no_message(&mut rx_a).await;
    assert_eq!(alice.state(), &joined("r1", "alice"));
}

#[tokio::test]
async fn clear_wipes_canvas_for_everyone() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx_a) = session(&registry);
    let (mut bob, mut rx_b) = session(&registry);
    join(&mut alice, &mut rx_a, "alice", "r2").await;
    join(&mut bob, &mut rx_b, "bob", "r2").await;
    recv_json(&mut rx_a).await;

    for i in 0..3 {
        let offset = f64::from(i);
        send(&mut alice, brush(&[[offset, offset], [offset + 1.0, offset + 1.0]])).await;
        recv_json(&mut rx_b).await;
    }
    assert_eq!(registry.snapshot("r2").await.operations.len(), 3);

    send(&mut bob, json!({"type": "CLEAR"})).await;
    assert_eq!(recv_json(&mut rx_a).await, json!({"type": "CLEAR"}));
    assert_eq!(recv_json(&mut rx_b).await, json!({"type": "CLEAR"}));

    let (mut carol, mut rx_c) = session(&registry);
    let init = join(&mut carol, &mut rx_c, "carol", "r2").await;
    assert_eq!(init["operations"], json!([]));
}

// =============================================================================
// IGNORED INPUT
// =============================================================================

#[tokio::test]
async fn messages_before_join_are_ignored() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx) = session(&registry);

    send(&mut alice, brush(&[[1.0, 1.0]])).await;
    send(&mut alice, json!({"type": "CLEAR"})).await;

    assert_eq!(alice.state(), &SessionState::Unjoined);
    assert_eq!(registry.room_count().await, 0);
    assert_no_message(&mut rx).await;
}

#[tokio::test]
async fn malformed_and_unknown_input_is_ignored() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx_a) = session(&registry);
    let (mut bob, mut rx_b) = session(&registry);
    join(&mut alice, &mut rx_a, "alice", "r1").await;
    join(&mut bob, &mut rx_b, "bob", "r1").await;
    recv_json(&mut rx_a).await;

    alice.handle_text("not json").await;
    alice.handle_text(r#"{"type":"PING"}"#).await;
    alice.handle_text(r#"{"x":1}"#).await;
    alice.handle_text(r#"{"type":"CURSOR","x":"left"}"#).await;

    assert_no_message(&mut rx_a).await;
    assert_no_message(&mut rx_b).await;
    assert_eq!(alice.state(), &joined("r1", "alice"));
}

// =============================================================================
// REJOIN
// =============================================================================

#[tokio::test]
async fn rejoin_same_room_and_id_keeps_single_entry() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx_a) = session(&registry);
    join(&mut alice, &mut rx_a, "alice", "r1").await;
    send(&mut alice, brush(&[[1.0, 1.0]])).await;

    let init = join(&mut alice, &mut rx_a, "alice", "r1").await;

    assert_eq!(user_ids(&init["users"]), ["alice"]);
    assert_eq!(init["operations"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn rejoin_delivers_snapshot_after_pending_broadcasts() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx_a) = session(&registry);
    let (mut bob, mut rx_b) = session(&registry);
    join(&mut alice, &mut rx_a, "A", "r1").await;
    join(&mut bob, &mut rx_b, "B", "r1").await;
    send(&mut bob, brush(&[[1.0, 1.0], [2.0, 2.0]])).await;

    // USER_JOINED and DRAW are still queued for A when it joins again.
    send(&mut alice, json!({"type": "JOIN", "userId": "A", "room": "r1"})).await;

    assert_eq!(recv_json(&mut rx_a).await["type"], "USER_JOINED");
    assert_eq!(recv_json(&mut rx_a).await["type"], "DRAW");
    let init = recv_json(&mut rx_a).await;
    assert_eq!(init["type"], "INIT_STATE");
    assert_eq!(init["operations"].as_array().map(Vec::len), Some(1));
    assert_no_message(&mut rx_a).await;
}

#[tokio::test]
async fn rejoin_other_room_snapshot_follows_old_room_traffic() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx_a) = session(&registry);
    let (mut bob, mut rx_b) = session(&registry);
    join(&mut bob, &mut rx_b, "bob", "r1").await;
    join(&mut alice, &mut rx_a, "alice", "r1").await;
    recv_json(&mut rx_b).await;
    send(&mut bob, brush(&[[1.0, 1.0]])).await;

    send(&mut alice, json!({"type": "JOIN", "userId": "alice", "room": "r2"})).await;

    assert_eq!(recv_json(&mut rx_a).await["type"], "DRAW");
    let init = recv_json(&mut rx_a).await;
    assert_eq!(init["type"], "INIT_STATE");
    assert_eq!(init["operations"], json!([]));

    let notice = recv_json(&mut rx_b).await;
    assert_eq!(notice["type"], "USER_LEFT");
    assert_eq!(notice["userId"], "alice");
    let remaining = registry.list_participants("r1").await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "bob");
    assert!(registry.contains("r2").await);
}

#[tokio::test]
async fn rejoin_same_room_new_id_replaces_old_id() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx_a) = session(&registry);
    let (mut bob, mut rx_b) = session(&registry);
    join(&mut alice, &mut rx_a, "alice", "r1").await;
    join(&mut bob, &mut rx_b, "bob", "r1").await;
    recv_json(&mut rx_a).await;
    send(&mut alice, brush(&[[1.0, 1.0]])).await;
    recv_json(&mut rx_b).await;

    let init = join(&mut alice, &mut rx_a, "alice-2", "r1").await;

    assert_eq!(init["operations"].as_array().map(Vec::len), Some(1));
    assert_eq!(user_ids(&init["users"]), ["alice-2", "bob"]);
    assert_no_message(&mut rx_a).await;

    let left = recv_json(&mut rx_b).await;
    assert_eq!(left["type"], "USER_LEFT");
    assert_eq!(left["userId"], "alice");
    let joined_notice = recv_json(&mut rx_b).await;
    assert_eq!(joined_notice["type"], "USER_JOINED");
    assert_eq!(joined_notice["userId"], "alice-2");
    assert_eq!(user_ids(&joined_notice["users"]), ["alice-2", "bob"]);
}

// =============================================================================
// SUPERSEDED CONNECTIONS
// =============================================================================

#[tokio::test]
async fn stale_connection_close_does_not_evict_reconnected_user() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut old, mut rx_old) = session(&registry);
    let (mut new, mut rx_new) = session(&registry);
    join(&mut old, &mut rx_old, "alice", "r1").await;
    join(&mut new, &mut rx_new, "alice", "r1").await;

    old.close().await;

    let users = registry.list_participants("r1").await;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, "alice");
}

#[tokio::test]
async fn superseded_session_cannot_touch_the_room() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut old, mut rx_old) = session(&registry);
    let (mut new, mut rx_new) = session(&registry);
    join(&mut old, &mut rx_old, "alice", "r1").await;
    join(&mut new, &mut rx_new, "alice", "r1").await;
    send(&mut new, brush(&[[1.0, 1.0]])).await;

    send(&mut old, brush(&[[9.0, 9.0]])).await;
    assert_eq!(old.state(), &SessionState::Unjoined);
    send(&mut old, json!({"type": "UNDO"})).await;
    send(&mut old, json!({"type": "CLEAR"})).await;
    send(&mut old, json!({"type": "CURSOR", "x": 1, "y": 1})).await;

    let snapshot = registry.snapshot("r1").await;
    assert_eq!(snapshot.operations.len(), 1);
    assert_eq!(snapshot.operations[0].points, Points::Stroke(vec![Point { x: 1.0, y: 1.0 }]));
    assert_no_message(&mut rx_new).await;
    assert_eq!(new.state(), &joined("r1", "alice"));
}

#[tokio::test]
async fn superseded_session_does_not_revive_destroyed_room() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut old, mut rx_old) = session(&registry);
    let (mut new, mut rx_new) = session(&registry);
    join(&mut old, &mut rx_old, "u", "r1").await;
    join(&mut new, &mut rx_new, "u", "r1").await;

    new.close().await;
    assert_eq!(registry.room_count().await, 0);

    send(&mut old, brush(&[[1.0, 1.0]])).await;
    send(&mut old, json!({"type": "UNDO"})).await;
    send(&mut old, json!({"type": "REDO"})).await;
    send(&mut old, json!({"type": "CLEAR"})).await;
    old.close().await;

    assert_eq!(registry.room_count().await, 0);

    let (mut late, mut rx_late) = session(&registry);
    let init = join(&mut late, &mut rx_late, "late", "r1").await;
    assert_eq!(init["operations"], json!([]));
}

// =============================================================================
// CLOSE
// =============================================================================

#[tokio::test]
async fn close_notifies_peers_and_destroys_empty_room() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx_a) = session(&registry);
    let (mut bob, mut rx_b) = session(&registry);
    join(&mut bob, &mut rx_b, "bob", "r1").await;
    join(&mut alice, &mut rx_a, "alice", "r1").await;
    recv_json(&mut rx_b).await;

    alice.close().await;
    let notice = recv_json(&mut rx_b).await;
    assert_eq!(notice["type"], "USER_LEFT");
    assert_eq!(notice["userId"], "alice");
    assert_eq!(user_ids(&notice["users"]), ["bob"]);

    bob.close().await;
    assert!(!registry.contains("r1").await);
}

#[tokio::test]
async fn closed_session_ignores_everything() {
    let registry = Arc::new(RoomRegistry::new());
    let (mut alice, mut rx) = session(&registry);
    alice.close().await;

    send(&mut alice, json!({"type": "JOIN", "userId": "alice", "room": "r1"})).await;

    assert_eq!(alice.state(), &SessionState::Closed);
    assert_eq!(registry.room_count().await, 0);
    assert_no_message(&mut rx).await;
}
