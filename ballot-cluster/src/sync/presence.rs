//! Membership upkeep driven by departure events
//!
//! A connection closing on one node must update membership in the shared
//! store, and may complete a round. The listener sees every departure on the
//! sessions this node has connections for, and hands it to the voting
//! service. Several nodes may handle the same departure; the service makes
//! that harmless.

use std::future::Future;
use std::sync::Arc;

use ballot_core::models::SessionEvent;
use ballot_core::service::VotingService;
use ballot_core::KeyBuilder;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::broker::{Broker, BrokerMessage};
use super::session_hub::SessionHub;

pub struct PresenceListener {
    broker: Arc<dyn Broker>,
    service: VotingService,
    hub: Arc<SessionHub>,
    keys: KeyBuilder,
}

impl PresenceListener {
    /// `broker` must be the presence broker the hub was built with
    pub fn new(
        broker: Arc<dyn Broker>,
        service: VotingService,
        hub: Arc<SessionHub>,
        keys: KeyBuilder,
    ) -> Self {
        Self {
            broker,
            service,
            hub,
            keys,
        }
    }

    /// Handle departures until `cancel` fires. The broker receiver is taken
    /// when this is called.
    pub fn run(self, cancel: CancellationToken) -> impl Future<Output = ()> + Send {
        let mut messages = self.broker.messages();

        async move {
            info!("Presence listener started");

            loop {
                let received = tokio::select! {
                    () = cancel.cancelled() => break,
                    received = messages.recv() => received,
                };

                match received {
                    Ok(message) => self.handle(message).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Presence listener lagged, departures may have been missed");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Presence broker channel closed");
                        break;
                    }
                }
            }

            info!("Presence listener stopped");
        }
    }

    async fn handle(&self, message: BrokerMessage) {
        let Some(session_id) = self.keys.session_from_topic(&message.topic) else {
            debug!(topic = %message.topic, "Ignoring message on unknown topic");
            return;
        };

        let event: SessionEvent = match serde_json::from_str(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    payload = %message.payload,
                    "Skipping malformed session event"
                );
                return;
            }
        };

        if !matches!(
            event,
            SessionEvent::UserLeft { .. } | SessionEvent::ObserverLeft { .. }
        ) {
            return;
        }

        if let Err(e) = self.service.handle_presence_event(&session_id, &event).await {
            error!(
                session_id = %session_id,
                event_type = %event.event_type(),
                error = %e,
                "Failed to handle departure"
            );
        }

        if let Err(e) = self.hub.release_presence_if_idle(&session_id).await {
            warn!(session_id = %session_id, error = %e, "Failed to release presence subscription");
        }
    }
}
