//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;

use crate::config::Config;
use crate::sessions::SessionManager;
use crate::store::Store;

/// Shared application state for the termhub server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Query façade over the SQLite database.
    pub store: Store,
    /// Registry of live terminal sessions.
    pub session_manager: SessionManager,
}
