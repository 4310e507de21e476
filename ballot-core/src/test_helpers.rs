//! Test helpers for ballot-core tests

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::models::{SessionEvent, SessionId, User};
use crate::service::EventPublisher;
use crate::Result;

/// Publisher that records every event instead of delivering it
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(SessionId, SessionEvent)>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<(SessionId, SessionEvent)> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Voters and tally of every `VoteFinished` seen so far
    pub fn finished(&self) -> Vec<(Vec<User>, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, event)| match event {
                SessionEvent::VoteFinished { users, tally } => Some((users.clone(), tally.clone())),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, session_id: &SessionId, event: &SessionEvent) -> Result<()> {
        self.events.lock().push((session_id.clone(), event.clone()));
        Ok(())
    }
}
