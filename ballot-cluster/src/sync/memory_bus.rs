//! In-process broker for single-node mode and multi-node tests
//!
//! Every [`MemoryBroker`] created from the same [`MemoryBus`] behaves like a
//! separate broker connection: it has its own subscriptions and receives a
//! published message only if it is subscribed to the topic.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use super::broker::{Broker, BrokerMessage, MESSAGE_CHANNEL_CAPACITY};
use crate::{Error, Result};

struct Member {
    topics: Mutex<HashSet<String>>,
    tx: broadcast::Sender<BrokerMessage>,
}

/// Shared message bus
#[derive(Default)]
pub struct MemoryBus {
    members: Mutex<Vec<Weak<Member>>>,
    offline: AtomicBool,
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a new broker handle attached to this bus
    #[must_use]
    pub fn broker(self: &Arc<Self>) -> MemoryBroker {
        let (tx, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let member = Arc::new(Member {
            topics: Mutex::new(HashSet::new()),
            tx,
        });
        self.members.lock().push(Arc::downgrade(&member));

        MemoryBroker {
            bus: Arc::clone(self),
            member,
        }
    }

    /// Make every operation fail, simulating a lost broker
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Broker("memory bus is offline".to_string()));
        }
        Ok(())
    }

    fn deliver(&self, message: &BrokerMessage) -> usize {
        let mut members = self.members.lock();
        members.retain(|weak| weak.strong_count() > 0);

        members
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|member| member.topics.lock().contains(&message.topic))
            .filter(|member| member.tx.send(message.clone()).is_ok())
            .count()
    }
}

/// Broker handle on a [`MemoryBus`]
#[derive(Clone)]
pub struct MemoryBroker {
    bus: Arc<MemoryBus>,
    member: Arc<Member>,
}

impl MemoryBroker {
    /// Whether this handle is subscribed to `topic`
    #[must_use]
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.member.topics.lock().contains(topic)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.bus.ensure_online()?;

        let delivered = self.bus.deliver(&BrokerMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        debug!(topic = %topic, delivered, "Published on memory bus");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.bus.ensure_online()?;
        self.member.topics.lock().insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.bus.ensure_online()?;
        self.member.topics.lock().remove(topic);
        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<BrokerMessage> {
        self.member.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivery_follows_subscriptions() {
        let bus = MemoryBus::new();
        let a = bus.broker();
        let b = bus.broker();
        let mut rx_a = a.messages();
        let mut rx_b = b.messages();

        a.subscribe("t1").await.unwrap();
        b.publish("t1", "hello").await.unwrap();

        let msg = rx_a.recv().await.unwrap();
        assert_eq!(msg.topic, "t1");
        assert_eq!(msg.payload, "hello");
        assert!(rx_b.try_recv().is_err(), "b is not subscribed");

        a.unsubscribe("t1").await.unwrap();
        b.publish("t1", "again").await.unwrap();
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_offline_bus_fails() {
        let bus = MemoryBus::new();
        let broker = bus.broker();

        bus.set_offline(true);
        assert!(broker.subscribe("t").await.is_err());
        assert!(broker.publish("t", "x").await.is_err());
        assert!(!broker.is_subscribed("t"));

        bus.set_offline(false);
        broker.subscribe("t").await.unwrap();
        assert!(broker.is_subscribed("t"));
    }

    #[tokio::test]
    async fn test_dropped_handles_are_pruned() {
        let bus = MemoryBus::new();
        let keep = bus.broker();
        {
            let dropped = bus.broker();
            dropped.subscribe("t").await.unwrap();
        }
        keep.publish("t", "x").await.unwrap();
        assert_eq!(bus.members.lock().len(), 1);
    }
}
