//! Session creation, listing, and deletion.
//!
//! - `POST   /sessions`       — create 1–10 sessions from a profile
//! - `GET    /sessions`       — list session records, newest first
//! - `DELETE /sessions/{id}`  — terminate, delete the record, remove the log

use std::path::Path as FsPath;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::profiles::profile_json;
use super::{internal, not_found, ApiError};
use crate::store::SessionRow;
use crate::AppState;

#[derive(Deserialize)]
pub struct SessionCreateRequest {
    pub profile_id: i64,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

/// Out-of-range quantities are clamped, not rejected.
fn clamp_quantity(quantity: i64) -> i64 {
    quantity.clamp(1, 10)
}

fn session_info_json(record: &SessionRow, profile: &Value) -> Value {
    json!({
        "session_id": record.id,
        "profile": profile,
        "status": record.status,
        "exit_code": record.exit_code,
        "cwd": record.cwd,
        "log_path": record.log_path,
        "created_at": record.created_at,
        "finished_at": record.finished_at,
    })
}

/// `POST /sessions` — create contexts and records for `quantity` sessions.
///
/// The children are not spawned here; each session starts on its first
/// WebSocket attach.
pub async fn create_sessions(
    State(state): State<AppState>,
    Json(payload): Json<SessionCreateRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let profile = state
        .store
        .get_profile(payload.profile_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("配置不存在"))?;
    let quantity = clamp_quantity(payload.quantity);
    let profile_value = profile_json(&profile);

    let mut sessions = Vec::with_capacity(usize::try_from(quantity).unwrap_or(1));
    for _ in 0..quantity {
        let context = state
            .session_manager
            .create_session(&profile)
            .await
            .map_err(internal)?;
        let record = state
            .store
            .insert_session(
                &context.session_id,
                profile.id,
                context.cwd.to_str(),
                &context.log_path.to_string_lossy(),
            )
            .await
            .map_err(internal)?;
        sessions.push(session_info_json(&record, &profile_value));
    }

    Ok((StatusCode::CREATED, Json(json!({ "sessions": sessions }))))
}

/// `GET /sessions` — every session record with its profile, newest first.
pub async fn list_sessions(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let rows = state.store.list_sessions().await.map_err(internal)?;
    Ok(Json(Value::Array(
        rows.iter()
            .map(|(record, profile)| session_info_json(record, &profile_json(profile)))
            .collect(),
    )))
}

/// `DELETE /sessions/{id}` — terminate if live, delete the record, and remove
/// the log file (and its directory, when that leaves it empty).
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let record = state
        .store
        .get_session(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("Session 未找到"))?;

    if state.session_manager.has_session(&id).await {
        state
            .session_manager
            .terminate_session(&id, Some("会话已删除"))
            .await;
    }

    state.store.delete_session(&id).await.map_err(internal)?;
    remove_log_artifacts(FsPath::new(&record.log_path)).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Best-effort removal of a session's log file and its directory.
async fn remove_log_artifacts(log_path: &FsPath) {
    let _ = tokio::fs::remove_file(log_path).await;
    if let Some(dir) = log_path.parent() {
        // remove_dir refuses non-empty directories, which is the point.
        let _ = tokio::fs::remove_dir(dir).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_clamps_at_both_ends() {
        assert_eq!(clamp_quantity(0), 1);
        assert_eq!(clamp_quantity(-5), 1);
        assert_eq!(clamp_quantity(1), 1);
        assert_eq!(clamp_quantity(10), 10);
        assert_eq!(clamp_quantity(11), 10);
        assert_eq!(clamp_quantity(100), 10);
    }

    #[tokio::test]
    async fn log_artifact_removal_leaves_shared_dirs_alone() {
        let dir = tempfile::tempdir().unwrap();
        let session_dir = dir.path().join("abc");
        tokio::fs::create_dir_all(&session_dir).await.unwrap();
        let log = session_dir.join("raw.log");
        tokio::fs::write(&log, b"bytes").await.unwrap();
        let extra = session_dir.join("keep.txt");
        tokio::fs::write(&extra, b"other").await.unwrap();

        remove_log_artifacts(&log).await;
        assert!(!log.exists());
        assert!(session_dir.exists(), "non-empty directory must survive");

        tokio::fs::remove_file(&extra).await.unwrap();
        let log2 = session_dir.join("raw.log");
        tokio::fs::write(&log2, b"bytes").await.unwrap();
        remove_log_artifacts(&log2).await;
        assert!(!session_dir.exists(), "empty directory is removed");
    }
}
