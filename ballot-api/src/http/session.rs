// Session HTTP handlers

use axum::{extract::State, Json};
use ballot_core::models::Session;

use super::{AppResult, AppState};

/// Create a new planning session
pub async fn create_session(State(state): State<AppState>) -> AppResult<Json<Session>> {
    let session = state.voting.create_session().await?;
    Ok(Json(session))
}
