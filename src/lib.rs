#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]

//! termhub library — terminal session multiplexing over WebSockets.
//!
//! The key building blocks:
//! - `config` — configuration loading
//! - `db` / `store` — SQLite persistence for profiles and session records
//! - `git` — status/diff helpers for per-command change tracking
//! - `shell` — process back-ends (PTY and pipe)
//! - `sessions` — session registry, I/O pumps, exit monitoring
//! - `ws` — WebSocket protocol handling
//! - `routes` — REST API route handlers

pub mod config;
pub mod db;
pub mod git;
pub mod routes;
pub mod sessions;
pub mod shell;
pub mod state;
pub mod store;
pub mod ws;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use sessions::SessionManager;
pub use state::AppState;
pub use store::Store;
