// Module: sync

pub mod broker;
pub mod memory_bus;
pub mod presence;
pub mod redis_pubsub;
pub mod session_hub;

pub use broker::{Broker, BrokerMessage};
pub use memory_bus::{MemoryBroker, MemoryBus};
pub use presence::PresenceListener;
pub use redis_pubsub::RedisBroker;
pub use session_hub::{ConnectionId, MessageSender, SessionHub};
