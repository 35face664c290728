//! Raw-log retrieval and maintenance.
//!
//! - `GET  /logs/{id}`        — current log content, live or historical
//! - `POST /logs/{id}/clear`  — truncate a session's raw log

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use super::{internal, not_found, ApiError};
use crate::store::SessionStatus;
use crate::AppState;

const HISTORICAL_NOTICE: &str = "以下内容来自历史日志，仅供回放。";

/// `GET /logs/{id}` — the session's raw log, lossily decoded.
///
/// `historical` is true when the record is terminal or no live child exists;
/// the client then shows the replay notice instead of treating the content
/// as a live stream.
pub async fn fetch_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .store
        .get_session(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("Session 未找到"))?;

    let content = match state.session_manager.get_log_text(&id).await {
        Some(content) => content,
        None => match tokio::fs::read(&record.log_path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => return Err(not_found("日志文件不存在")),
        },
    };

    let active = state.session_manager.is_active(&id).await;
    let historical = record.status != SessionStatus::Running.as_str() || !active;
    Ok(Json(json!({
        "session_id": id,
        "content": content,
        "historical": historical,
        "message": if historical { Some(HISTORICAL_NOTICE) } else { None },
    })))
}

/// `POST /logs/{id}/clear` — truncate the raw log.
///
/// A live session's open handle is truncated in place (appends continue at
/// offset zero); a historical log is truncated on disk.
pub async fn clear_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.session_manager.clear_log(&id).await {
        return Ok(Json(json!({ "ok": true })));
    }

    let record = state
        .store
        .get_session(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("Session 未找到"))?;
    match tokio::fs::File::create(&record.log_path).await {
        Ok(_) => Ok(Json(json!({ "ok": true }))),
        Err(_) => Err(not_found("日志文件不存在")),
    }
}
