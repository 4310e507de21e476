pub mod error;
pub mod sync;

pub use error::{Error, Result};
pub use sync::{
    Broker, BrokerMessage, ConnectionId, MemoryBroker, MemoryBus, MessageSender,
    PresenceListener, RedisBroker, SessionHub,
};
