//! WebSocket endpoint
//!
//! Each text frame is one JSON object. Clients send actions (`WATCH`, `START`,
//! `RESTART`, `VOTE`) and receive session events. Outbound frames go through
//! an unbounded channel drained by a per-connection writer task, so the hub
//! never waits on a slow socket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use ballot_cluster::MessageSender;
use ballot_core::models::{generate_id, SessionId, UserId};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::http::AppState;

/// Action sent by a client
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientAction {
    /// Start receiving a session's events, optionally joining it as a user
    Watch {
        session_id: SessionId,
        #[serde(default)]
        user_id: Option<UserId>,
    },
    Start {
        session_id: SessionId,
    },
    Restart {
        session_id: SessionId,
    },
    Vote {
        session_id: SessionId,
    },
}

/// WebSocket handler for session updates
pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Frames are small JSON objects
    ws.max_message_size(64 * 1024)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = generate_id();
    info!(connection_id = %connection_id, "WebSocket connection established");

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Spawn task to handle server messages -> WebSocket
    let writer_id = connection_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = ws_sink.send(Message::Text(frame.into())).await {
                debug!(connection_id = %writer_id, error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(message) = ws_stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                break;
            }
        };

        let action = match serde_json::from_str::<ClientAction>(text.as_str()) {
            Ok(action) => action,
            Err(e) => {
                warn!(
                    connection_id = %connection_id,
                    error = %e,
                    frame = %text.as_str(),
                    "Ignoring malformed frame"
                );
                continue;
            }
        };

        handle_action(&state, &connection_id, &tx, action).await;
    }

    if let Err(e) = state.hub.unsubscribe_all(&connection_id).await {
        error!(connection_id = %connection_id, error = %e, "Failed to clean up closed connection");
    }
    writer.abort();

    info!(connection_id = %connection_id, "WebSocket connection closed");
}

async fn handle_action(
    state: &AppState,
    connection_id: &str,
    tx: &MessageSender,
    action: ClientAction,
) {
    match action {
        ClientAction::Watch {
            session_id,
            user_id,
        } => {
            let user_id = user_id.filter(|id| !id.as_str().is_empty());
            if let Err(e) = watch(state, connection_id, tx, &session_id, user_id).await {
                warn!(
                    connection_id = %connection_id,
                    session_id = %session_id,
                    error = %e,
                    "WATCH failed"
                );
            }
        }
        // Round changes go through the HTTP API; these only announce intent
        ClientAction::Start { session_id } => {
            debug!(connection_id = %connection_id, session_id = %session_id, "START");
        }
        ClientAction::Restart { session_id } => {
            debug!(connection_id = %connection_id, session_id = %session_id, "RESTART");
        }
        ClientAction::Vote { session_id } => {
            debug!(connection_id = %connection_id, session_id = %session_id, "VOTE");
        }
    }
}

/// Subscribe the connection, join the user if one is given, then send the
/// session snapshot to this connection only
async fn watch(
    state: &AppState,
    connection_id: &str,
    tx: &MessageSender,
    session_id: &SessionId,
    user_id: Option<UserId>,
) -> ballot_core::Result<()> {
    state
        .hub
        .subscribe(connection_id, session_id, tx.clone())
        .await?;

    if let Some(user_id) = user_id {
        let user = state.voting.join_session(session_id, &user_id).await?;
        state
            .hub
            .associate_user(connection_id, user.id.clone(), user.role())
            .await;
    }

    let snapshot = state.voting.session_snapshot(session_id).await?;
    let payload = serde_json::to_string(&snapshot)?;
    if tx.send(payload).is_err() {
        debug!(connection_id = %connection_id, "Connection closed before snapshot was sent");
    }
    Ok(())
}
