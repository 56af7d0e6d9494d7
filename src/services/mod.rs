//! Domain services used by the websocket route.
//!
//! ARCHITECTURE
//! ============
//! Leaves first: `operation_log` knows nothing about rooms, `broadcast`
//! knows nothing about protocol state, `room` owns both per room, and
//! `session` drives them from inbound client messages.

pub mod broadcast;
pub mod operation_log;
pub mod room;
pub mod session;
