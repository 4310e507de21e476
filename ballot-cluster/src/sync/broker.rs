use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::Result;

/// Capacity of the channel carrying received broker messages to local
/// consumers. A consumer that falls further behind sees a lag error.
pub const MESSAGE_CHANNEL_CAPACITY: usize = 1024;

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: String,
}

/// Topic-based publish/subscribe transport shared by all nodes.
///
/// Each handle has its own subscriptions. Messages for any of them arrive on
/// the receivers returned by [`Broker::messages`].
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;

    async fn subscribe(&self, topic: &str) -> Result<()>;

    async fn unsubscribe(&self, topic: &str) -> Result<()>;

    /// New receiver for messages on this handle's topics
    fn messages(&self) -> broadcast::Receiver<BrokerMessage>;
}
