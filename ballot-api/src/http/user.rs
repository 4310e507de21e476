// User HTTP handlers

use axum::{
    extract::{Path, State},
    Json,
};
use ballot_core::models::{SessionId, User, UserId};
use serde::{Deserialize, Deserializer};

use super::{AppResult, AppState};

/// Create user request
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub session_id: SessionId,
    #[serde(default, deserialize_with = "flag")]
    pub is_observer: bool,
    #[serde(default, deserialize_with = "flag")]
    pub is_admin: bool,
}

/// Accept a boolean flag as `true`/`false` or `1`/`0`
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Int(0) => Ok(false),
        Flag::Int(1) => Ok(true),
        Flag::Int(other) => Err(serde::de::Error::custom(format!(
            "expected 0 or 1, got {other}"
        ))),
    }
}

/// Create a user in a session
pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> AppResult<Json<User>> {
    let user = state
        .voting
        .create_user(&req.session_id, &req.name, req.is_admin, req.is_observer)
        .await?;
    Ok(Json(user))
}

/// Get a user by id
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<User>> {
    let user = state.voting.get_user(&UserId::from_string(user_id)).await?;
    Ok(Json(user))
}
