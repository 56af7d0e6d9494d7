//! Real-time shared drawing rooms over WebSocket.

pub mod config;
pub mod operation;
pub mod protocol;
pub mod routes;
pub mod services;
pub mod state;
