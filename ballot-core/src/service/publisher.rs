use async_trait::async_trait;

use crate::models::{SessionEvent, SessionId};
use crate::Result;

/// Delivers session events to every connection watching the session, on any
/// node.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, session_id: &SessionId, event: &SessionEvent) -> Result<()>;
}
