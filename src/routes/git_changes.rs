//! Read-only git overview for a session's working directory.

use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use super::{internal, not_found, ApiError};
use crate::git;
use crate::AppState;

/// `GET /git_changes/{id}` — short status rows and diff stat for the
/// session's working directory.
///
/// Works for live sessions (context cwd) and historical ones (recorded cwd).
/// A directory without `.git` yields `{"git": false}` rather than an error.
pub async fn git_changes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let cwd: Option<PathBuf> = if let Ok(context) = state.session_manager.get(&id).await {
        Some(context.cwd.clone())
    } else {
        state
            .store
            .get_session(&id)
            .await
            .map_err(internal)?
            .and_then(|record| record.cwd.map(PathBuf::from))
    };
    let Some(cwd) = cwd else {
        return Err(not_found("Session 未找到"));
    };

    if !cwd.join(".git").exists() {
        return Ok(Json(json!({
            "git": false,
            "message": "not a git repository",
        })));
    }

    let status = git::status_rows(&cwd).await.map(|rows| {
        rows.into_iter()
            .map(|(code, path)| json!({ "status": code, "path": path }))
            .collect::<Vec<Value>>()
    });
    let diff_stat = git::diff_stat(&cwd).await;

    Ok(Json(json!({
        "git": true,
        "status": status,
        "diff_stat": diff_stat,
        "message": null,
    })))
}
