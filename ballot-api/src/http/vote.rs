// Voting HTTP handlers

use axum::{extract::State, Json};
use ballot_core::models::{PendingVote, SessionId, UserId};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{AppResult, AppState};

/// Request naming a session
#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub session_id: SessionId,
}

/// Cast vote request
#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub estimate: String,
}

/// Start (or restart) a voting round
pub async fn start_vote(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> AppResult<Json<Value>> {
    state.voting.start_vote(&req.session_id).await?;
    Ok(Json(json!({})))
}

/// Finish the current round and reveal estimates
pub async fn finish_vote(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> AppResult<Json<Value>> {
    state.voting.finish_vote(&req.session_id).await?;
    Ok(Json(json!({})))
}

pub async fn cast_vote(
    State(state): State<AppState>,
    Json(req): Json<CastVoteRequest>,
) -> AppResult<Json<PendingVote>> {
    let vote = state
        .voting
        .cast_vote(&req.session_id, &req.user_id, &req.estimate)
        .await?;
    Ok(Json(vote))
}
