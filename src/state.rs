//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the process-wide room registry, created empty at startup and never
//! persisted, plus the parsed server configuration.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::services::room::RoomRegistry;

/// Clone is required by Axum; all fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self { registry: Arc::new(RoomRegistry::new()), config: Arc::new(config) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
