// HTTP/JSON API and WebSocket endpoint

pub mod error;
pub mod health;
pub mod session;
pub mod user;
pub mod vote;
pub mod websocket;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use ballot_cluster::SessionHub;
use ballot_core::service::VotingService;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub voting: VotingService,
    pub hub: Arc<SessionHub>,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .merge(health::create_health_router())
        .route("/api/session", post(session::create_session))
        .route("/api/user", post(user::create_user))
        .route("/api/user/{id}", get(user::get_user))
        .route("/api/vote/start", put(vote::start_vote))
        .route("/api/vote/finish", put(vote::finish_vote))
        .route("/api/vote/cast", put(vote::cast_vote))
        .route("/ws", get(websocket::websocket_handler));

    // Apply layers before state
    let router = router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Apply state to all routes (must be last)
    router.with_state(state)
}
