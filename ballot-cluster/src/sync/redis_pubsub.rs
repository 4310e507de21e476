use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::StreamExt;
use parking_lot::Mutex;
use redis::aio::{ConnectionManager as RedisConnectionManager, PubSubSink};
use redis::Client as RedisClient;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::broker::{Broker, BrokerMessage, MESSAGE_CHANNEL_CAPACITY};
use crate::{Error, Result};

/// Initial backoff delay for subscriber reconnection
const INITIAL_BACKOFF_SECS: u64 = 1;

/// Maximum backoff delay for subscriber reconnection
const MAX_BACKOFF_SECS: u64 = 30;

/// Redis Pub/Sub broker
///
/// Publishes through a shared connection manager and receives through a
/// dedicated Pub/Sub connection owned by a background task started with
/// [`RedisBroker::start`]. The set of subscribed topics is tracked here, so
/// after a reconnect every topic is subscribed again.
pub struct RedisBroker {
    name: &'static str,
    redis_client: RedisClient,
    publisher: RedisConnectionManager,
    connect_timeout: Duration,
    topics: Mutex<HashSet<String>>,
    /// Subscription half of the live Pub/Sub connection, `None` while disconnected
    sink: tokio::sync::Mutex<Option<PubSubSink>>,
    message_tx: broadcast::Sender<BrokerMessage>,
}

impl RedisBroker {
    /// Create a broker. `name` identifies the handle in logs.
    pub fn new(
        name: &'static str,
        redis_client: RedisClient,
        publisher: RedisConnectionManager,
        connect_timeout: Duration,
    ) -> Self {
        let (message_tx, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);

        Self {
            name,
            redis_client,
            publisher,
            connect_timeout,
            topics: Mutex::new(HashSet::new()),
            sink: tokio::sync::Mutex::new(None),
            message_tx,
        }
    }

    /// Open a client and a publishing connection for `redis_url`
    pub async fn connect(
        name: &'static str,
        redis_url: &str,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let redis_client =
            RedisClient::open(redis_url).map_err(|e| Error::Redis(e.to_string()))?;
        let publisher = timeout(
            connect_timeout,
            RedisConnectionManager::new(redis_client.clone()),
        )
        .await
        .map_err(|_| Error::Timeout(format!("connecting {name} broker to Redis")))?
        .map_err(|e| Error::Redis(e.to_string()))?;

        Ok(Self::new(name, redis_client, publisher, connect_timeout))
    }

    /// Whether a Pub/Sub connection is currently established
    pub async fn is_connected(&self) -> bool {
        self.sink.lock().await.is_some()
    }

    /// Spawn the receive loop. It reconnects with exponential backoff until
    /// `cancel` fires.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff_secs = INITIAL_BACKOFF_SECS;

            loop {
                match self.run_subscriber(&cancel).await {
                    SubscriberExit::Cancelled => {
                        info!(broker = self.name, "Redis subscriber task cancelled");
                        return;
                    }
                    SubscriberExit::Disconnected => {
                        // The server was reachable, so start over with a short delay
                        error!(
                            broker = self.name,
                            "Redis subscriber stream ended (connection lost), reconnecting after {}s",
                            INITIAL_BACKOFF_SECS
                        );
                        backoff_secs = INITIAL_BACKOFF_SECS;
                    }
                    SubscriberExit::ConnectFailed(e) => {
                        error!(
                            broker = self.name,
                            error = %e,
                            backoff_secs = backoff_secs,
                            "Redis subscriber failed to connect, retrying after backoff"
                        );
                    }
                }

                tokio::select! {
                    () = cancel.cancelled() => {
                        info!(broker = self.name, "Redis subscriber task cancelled during backoff");
                        return;
                    }
                    () = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                }

                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
            }
        })
    }

    /// Connect, subscribe to every tracked topic and forward messages until
    /// the connection drops or `cancel` fires.
    async fn run_subscriber(&self, cancel: &CancellationToken) -> SubscriberExit {
        let pubsub = match timeout(self.connect_timeout, self.redis_client.get_async_pubsub()).await
        {
            Ok(Ok(ps)) => ps,
            Ok(Err(e)) => {
                return SubscriberExit::ConnectFailed(Error::Redis(format!(
                    "failed to get Redis Pub/Sub connection: {e}"
                )));
            }
            Err(_) => {
                return SubscriberExit::ConnectFailed(Error::Timeout(
                    "getting Redis Pub/Sub connection".to_string(),
                ));
            }
        };
        let (mut sink, mut stream) = pubsub.split();

        {
            // Holding the sink lock keeps concurrent subscribe() calls out
            // until every tracked topic is subscribed on the new connection.
            let mut slot = self.sink.lock().await;
            let topics: Vec<String> = self.topics.lock().iter().cloned().collect();
            for topic in &topics {
                if let Err(e) = sink.subscribe(topic).await {
                    return SubscriberExit::ConnectFailed(Error::Redis(format!(
                        "failed to resubscribe to {topic}: {e}"
                    )));
                }
            }
            *slot = Some(sink);

            info!(
                broker = self.name,
                topics = topics.len(),
                "Redis subscriber connected"
            );
        }

        let exit = loop {
            let msg = tokio::select! {
                () = cancel.cancelled() => break SubscriberExit::Cancelled,
                msg = stream.next() => msg,
            };

            let Some(msg) = msg else {
                break SubscriberExit::Disconnected;
            };

            let topic = msg.get_channel_name().to_string();
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(broker = self.name, error = %e, topic = %topic, "Invalid payload");
                    continue;
                }
            };

            // No receivers is fine: nothing local is listening right now
            let _ = self.message_tx.send(BrokerMessage { topic, payload });
        };

        *self.sink.lock().await = None;
        exit
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;

        debug!(broker = self.name, topic = %topic, receivers, "Published to Redis");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        let mut slot = self.sink.lock().await;
        self.topics.lock().insert(topic.to_string());

        let Some(sink) = slot.as_mut() else {
            warn!(
                broker = self.name,
                topic = %topic,
                "Redis subscriber not connected, topic will be subscribed on reconnect"
            );
            return Ok(());
        };

        if let Err(e) = sink.subscribe(topic).await {
            self.topics.lock().remove(topic);
            return Err(Error::Redis(format!("failed to subscribe to {topic}: {e}")));
        }

        debug!(broker = self.name, topic = %topic, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let mut slot = self.sink.lock().await;
        self.topics.lock().remove(topic);

        if let Some(sink) = slot.as_mut() {
            sink.unsubscribe(topic)
                .await
                .map_err(|e| Error::Redis(format!("failed to unsubscribe from {topic}: {e}")))?;
            debug!(broker = self.name, topic = %topic, "Unsubscribed");
        }
        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<BrokerMessage> {
        self.message_tx.subscribe()
    }
}

/// Describes how the subscriber loop exited, enabling proper backoff behavior.
enum SubscriberExit {
    /// Connection was established and messages were being processed, but the
    /// stream ended (Redis disconnected). Backoff is reset.
    Disconnected,
    /// Failed to connect or subscribe. Backoff keeps increasing.
    ConnectFailed(Error),
    /// Shutdown was requested
    Cancelled,
}
