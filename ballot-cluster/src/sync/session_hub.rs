use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use ballot_core::models::{MemberRole, SessionEvent, SessionId, UserId};
use ballot_core::service::EventPublisher;
use ballot_core::KeyBuilder;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::broker::Broker;
use crate::{Error, Result};

/// Handle for a client connection subscription
pub type ConnectionId = String;

/// Outbound frame sender for a client connection
pub type MessageSender = mpsc::UnboundedSender<String>;

#[derive(Default)]
struct HubState {
    /// session -> connections watching it on this node
    sessions: HashMap<SessionId, HashMap<ConnectionId, MessageSender>>,
    /// connection -> session, for cleanup
    sockets: HashMap<ConnectionId, SessionId>,
    /// connection -> user it speaks for
    users: HashMap<ConnectionId, (UserId, MemberRole)>,
    /// sessions the presence broker is subscribed to
    presence_topics: HashSet<SessionId>,
}

/// Registry of this node's WebSocket connections, grouped by session
///
/// Events are never written straight to local connections: [`SessionHub::emit`]
/// publishes on the session topic and [`SessionHub::run`] relays whatever the
/// broker delivers back to local connections, so every node (this one
/// included) sees the same stream.
///
/// The hub also keeps the presence broker subscribed to every session with a
/// local connection. That subscription outlives the last local connection
/// until [`SessionHub::release_presence_if_idle`] is called, so the departure
/// of that connection still reaches the presence listener.
pub struct SessionHub {
    broker: Arc<dyn Broker>,
    presence: Option<Arc<dyn Broker>>,
    keys: KeyBuilder,
    state: RwLock<HubState>,
}

impl SessionHub {
    pub fn new(broker: Arc<dyn Broker>, keys: KeyBuilder) -> Self {
        Self {
            broker,
            presence: None,
            keys,
            state: RwLock::new(HubState::default()),
        }
    }

    /// Also manage the subscriptions of the presence listener's broker
    #[must_use]
    pub fn with_presence(mut self, presence: Arc<dyn Broker>) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Register a connection as watching a session.
    ///
    /// The first local connection of a session subscribes the session topic.
    /// If that subscription fails the registration is rolled back. A
    /// connection watching another session is moved.
    pub async fn subscribe(
        &self,
        connection_id: &str,
        session_id: &SessionId,
        sender: MessageSender,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        if let Some(previous) = state.sockets.get(connection_id).cloned() {
            if previous != *session_id {
                state.users.remove(connection_id);
                let detached = self.detach(&mut state, connection_id, &previous).await;
                let released = self.release_presence_locked(&mut state, &previous).await;
                detached.and(released)?;
            }
        }

        let first = !state.sessions.contains_key(session_id);
        let topic = self.keys.session_topic(session_id);

        if first {
            self.broker.subscribe(&topic).await?;

            if let Some(presence) = &self.presence {
                if !state.presence_topics.contains(session_id) {
                    if let Err(e) = presence.subscribe(&topic).await {
                        if let Err(undo) = self.broker.unsubscribe(&topic).await {
                            warn!(topic = %topic, error = %undo, "Failed to roll back topic subscription");
                        }
                        return Err(e);
                    }
                    state.presence_topics.insert(session_id.clone());
                }
            }
            debug!(session_id = %session_id, topic = %topic, "Subscribed to session topic");
        }

        state
            .sessions
            .entry(session_id.clone())
            .or_default()
            .insert(connection_id.to_string(), sender);
        state
            .sockets
            .insert(connection_id.to_string(), session_id.clone());

        info!(
            session_id = %session_id,
            connection_id = %connection_id,
            "Connection subscribed to session"
        );
        Ok(())
    }

    /// Record which user a connection speaks for
    pub async fn associate_user(&self, connection_id: &str, user_id: UserId, role: MemberRole) {
        let mut state = self.state.write().await;
        if !state.sockets.contains_key(connection_id) {
            warn!(connection_id = %connection_id, "Associating user with unknown connection");
            return;
        }
        state
            .users
            .insert(connection_id.to_string(), (user_id, role));
    }

    /// Forget a closed connection.
    ///
    /// If the connection spoke for a user, a `USER_LEFT` or `OBSERVER_LEFT`
    /// event is published on the session topic and the presence listener
    /// releases its subscription once it has seen the departure. Otherwise
    /// the presence subscription is released here. The local maps are
    /// always updated; broker errors are returned afterwards.
    pub async fn unsubscribe_all(&self, connection_id: &str) -> Result<()> {
        let (session_id, user, detached) = {
            let mut state = self.state.write().await;
            let Some(session_id) = state.sockets.get(connection_id).cloned() else {
                debug!(connection_id = %connection_id, "Closed connection was not watching a session");
                return Ok(());
            };
            let user = state.users.remove(connection_id);
            let mut detached = self.detach(&mut state, connection_id, &session_id).await;
            if user.is_none() {
                let released = self.release_presence_locked(&mut state, &session_id).await;
                detached = detached.and(released);
            }
            (session_id, user, detached)
        };

        info!(
            session_id = %session_id,
            connection_id = %connection_id,
            "Connection unsubscribed from session"
        );

        if let Some((user_id, role)) = user {
            let event = SessionEvent::departure(session_id.clone(), user_id, role);
            self.emit(&session_id, &event).await?;
        }
        detached
    }

    /// Remove a connection from a session, dropping the topic subscription
    /// when it was the last local one
    async fn detach(
        &self,
        state: &mut HubState,
        connection_id: &str,
        session_id: &SessionId,
    ) -> Result<()> {
        state.sockets.remove(connection_id);

        let now_empty = match state.sessions.get_mut(session_id) {
            Some(connections) => {
                connections.remove(connection_id);
                connections.is_empty()
            }
            None => false,
        };

        if now_empty {
            state.sessions.remove(session_id);
            debug!(session_id = %session_id, "Session has no more local connections");

            let topic = self.keys.session_topic(session_id);
            self.broker.unsubscribe(&topic).await?;
        }
        Ok(())
    }

    /// Drop the presence subscription of a session nobody on this node
    /// watches anymore
    pub async fn release_presence_if_idle(&self, session_id: &SessionId) -> Result<()> {
        let mut state = self.state.write().await;
        self.release_presence_locked(&mut state, session_id).await
    }

    async fn release_presence_locked(
        &self,
        state: &mut HubState,
        session_id: &SessionId,
    ) -> Result<()> {
        let Some(presence) = &self.presence else {
            return Ok(());
        };
        if state.sessions.contains_key(session_id) || !state.presence_topics.remove(session_id) {
            return Ok(());
        }

        presence
            .unsubscribe(&self.keys.session_topic(session_id))
            .await
    }

    /// Publish an event to every connection watching the session, on any node
    pub async fn emit(&self, session_id: &SessionId, event: &SessionEvent) -> Result<()> {
        let payload =
            serde_json::to_string(event).map_err(|e| Error::Serialization(e.to_string()))?;
        self.broker
            .publish(&self.keys.session_topic(session_id), &payload)
            .await?;

        debug!(
            session_id = %session_id,
            event_type = %event.event_type(),
            "Event emitted"
        );
        Ok(())
    }

    /// Write a payload to this node's connections of a session. Returns the
    /// number of connections written to.
    pub async fn emit_local(&self, session_id: &SessionId, payload: &str) -> usize {
        let state = self.state.read().await;
        let Some(connections) = state.sessions.get(session_id) else {
            return 0;
        };

        let mut sent_count = 0;
        for (connection_id, sender) in connections {
            match sender.send(payload.to_string()) {
                Ok(()) => sent_count += 1,
                Err(_) => {
                    // The connection task is shutting down and will unsubscribe itself
                    warn!(
                        session_id = %session_id,
                        connection_id = %connection_id,
                        "Failed to send event to closed connection"
                    );
                }
            }
        }
        sent_count
    }

    /// Relay broker messages to local connections until `cancel` fires.
    ///
    /// The broker receiver is taken when this is called, so messages published
    /// before the returned future is first polled are not lost.
    pub fn run(self: Arc<Self>, cancel: CancellationToken) -> impl Future<Output = ()> + Send {
        let mut messages = self.broker.messages();

        async move {
            info!("Session hub relay started");

            loop {
                let received = tokio::select! {
                    () = cancel.cancelled() => break,
                    received = messages.recv() => received,
                };

                match received {
                    Ok(message) => {
                        let Some(session_id) = self.keys.session_from_topic(&message.topic) else {
                            debug!(topic = %message.topic, "Ignoring message on unknown topic");
                            continue;
                        };
                        self.emit_local(&session_id, &message.payload).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session hub relay lagged behind the broker");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Broker message channel closed");
                        break;
                    }
                }
            }

            info!("Session hub relay stopped");
        }
    }

    /// Get the number of local connections watching a session
    pub async fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.state
            .read()
            .await
            .sessions
            .get(session_id)
            .map_or(0, HashMap::len)
    }

    /// Get the number of sessions with local connections
    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    /// Get total number of registered connections
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.sockets.len()
    }
}

#[async_trait]
impl EventPublisher for SessionHub {
    async fn publish(
        &self,
        session_id: &SessionId,
        event: &SessionEvent,
    ) -> ballot_core::Result<()> {
        Ok(self.emit(session_id, event).await?)
    }
}
