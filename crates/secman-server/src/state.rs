//! Shared application state for `secman` server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`.

use std::sync::Arc;

use secman_core::core::Core;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Barrier, engine registry and auth chain.
    pub core: Arc<Core>,
}

impl AppState {
    #[must_use]
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
