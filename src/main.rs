#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # termhub
//!
//! Terminal session multiplexer. termhub exposes an HTTP + WebSocket API for
//! spawning profile-defined child processes, streaming their terminal output
//! to any number of browser clients, forwarding keystrokes to stdin, and —
//! when the working directory is a git repository — injecting a before/after
//! status delta around each submitted command.

use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use termhub::{config::Config, db, routes, ws, AppState, SessionManager, Store};

/// Terminal session multiplexer.
#[derive(Parser)]
#[command(name = "termhub", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref());

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("termhub v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);

    std::fs::create_dir_all(config.resolved_data_dir()).expect("Failed to create data directory");
    std::fs::create_dir_all(config.resolved_logs_dir()).expect("Failed to create logs directory");

    let pool = db::connect(&config.resolved_database_url())
        .await
        .expect("Failed to open database");
    db::migrate(&pool).await.expect("Failed to run migrations");
    let store = Store::new(pool);

    // Crash recovery: sessions left `running` by a previous process lifetime
    // can never finish — mark them interrupted, exactly once, here.
    let orphaned = store
        .mark_orphan_sessions()
        .await
        .expect("Failed to recover orphaned sessions");
    if orphaned > 0 {
        info!("Marked {orphaned} orphaned session(s) as interrupted");
    }

    store
        .seed_default_profile(
            &config.profile.default_name,
            &config.profile.default_command,
            &config.resolved_default_cwd().to_string_lossy(),
        )
        .await
        .expect("Failed to seed default profile");

    let config = Arc::new(config);
    let session_manager = SessionManager::new(store.clone(), Arc::clone(&config));
    let state = AppState {
        config: Arc::clone(&config),
        store,
        session_manager: session_manager.clone(),
    };

    let app = Router::new()
        .route("/health", get(routes::health::health))
        .route(
            "/profiles",
            get(routes::profiles::list_profiles).post(routes::profiles::create_profile),
        )
        .route(
            "/profiles/{id}",
            put(routes::profiles::update_profile).delete(routes::profiles::delete_profile),
        )
        .route(
            "/sessions",
            post(routes::sessions::create_sessions).get(routes::sessions::list_sessions),
        )
        .route("/sessions/{id}", delete(routes::sessions::delete_session))
        .route("/logs/{id}", get(routes::logs::fetch_log))
        .route("/logs/{id}/clear", post(routes::logs::clear_log))
        .route("/git_changes/{id}", get(routes::git_changes::git_changes))
        .route("/ws/sessions/{id}", get(ws::session_socket))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_connections,
        ))
        .with_state(state);

    let listener = TcpListener::bind(&config.server.listen)
        .await
        .expect("Failed to bind");

    info!("Server ready");

    // Graceful shutdown
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    info!("Shutting down...");
    session_manager.shutdown().await;
    info!("Goodbye");
}
