//! CRUD endpoints for session profiles.
//!
//! - `GET    /profiles`       — list all profiles
//! - `POST   /profiles`       — create (400 on duplicate name)
//! - `PUT    /profiles/{id}`  — partial update
//! - `DELETE /profiles/{id}`  — remove

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{bad_request, internal, not_found, ApiError};
use crate::store::{ProfileChanges, ProfileRow, StoreError};
use crate::AppState;

pub(crate) fn profile_json(profile: &ProfileRow) -> Value {
    json!({
        "id": profile.id,
        "name": profile.name,
        "command": profile.command,
        "args": profile.args_list(),
        "cwd": profile.cwd,
        "env": profile.env_map(),
        "created_at": profile.created_at,
        "updated_at": profile.updated_at,
    })
}

fn map_store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::DuplicateName => bad_request("配置名称已存在"),
        StoreError::Db(db) => internal(db),
    }
}

/// `GET /profiles` — all profiles, oldest first.
pub async fn list_profiles(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let profiles = state.store.list_profiles().await.map_err(internal)?;
    Ok(Json(Value::Array(
        profiles.iter().map(profile_json).collect(),
    )))
}

#[derive(Deserialize)]
pub struct ProfileCreate {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// `POST /profiles` — create a profile.
pub async fn create_profile(
    State(state): State<AppState>,
    Json(payload): Json<ProfileCreate>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let profile = state
        .store
        .create_profile(
            &payload.name,
            &payload.command,
            &payload.args,
            payload.cwd.as_deref(),
            &payload.env,
        )
        .await
        .map_err(map_store_error)?;
    Ok((StatusCode::CREATED, Json(profile_json(&profile))))
}

#[derive(Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub cwd: Option<String>,
    pub env: Option<HashMap<String, String>>,
}

/// `PUT /profiles/{id}` — update the provided fields.
pub async fn update_profile(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ProfileUpdate>,
) -> Result<Json<Value>, ApiError> {
    let changes = ProfileChanges {
        name: payload.name,
        command: payload.command,
        args: payload.args,
        cwd: payload.cwd,
        env: payload.env,
    };
    let profile = state
        .store
        .update_profile(id, changes)
        .await
        .map_err(map_store_error)?
        .ok_or_else(|| not_found("配置不存在"))?;
    Ok(Json(profile_json(&profile)))
}

/// `DELETE /profiles/{id}`.
pub async fn delete_profile(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.store.delete_profile(id).await.map_err(internal)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("配置不存在"))
    }
}
