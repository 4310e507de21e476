//! Store key and broker topic naming
//!
//! Every key and topic used by the system is built here so the layout stays
//! consistent across nodes.

use crate::models::{SessionId, UserId};
use crate::Config;

/// Builds store keys and broker topics under a configurable prefix
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.redis.key_prefix.clone())
    }

    // ==================== Session State ====================

    /// Voting flag
    ///
    /// Type: String ("0" not voting, "1" voting) + TTL
    #[must_use]
    pub fn session_state(&self, session_id: &SessionId) -> String {
        format!("{}:session:{}:voting", self.prefix, session_id)
    }

    /// Number of voters who cast an estimate this round
    ///
    /// Type: String (integer) + TTL
    #[must_use]
    pub fn vote_count(&self, session_id: &SessionId) -> String {
        format!("{}:session:{}:vote_count", self.prefix, session_id)
    }

    /// Result of the last finished round
    ///
    /// Type: String + TTL
    #[must_use]
    pub fn tally(&self, session_id: &SessionId) -> String {
        format!("{}:session:{}:tally", self.prefix, session_id)
    }

    /// Voter ids
    ///
    /// Type: Set + TTL
    #[must_use]
    pub fn session_voters(&self, session_id: &SessionId) -> String {
        format!("{}:session:{}:users", self.prefix, session_id)
    }

    /// Observer ids
    ///
    /// Type: Set + TTL
    #[must_use]
    pub fn session_observers(&self, session_id: &SessionId) -> String {
        format!("{}:session:{}:observers", self.prefix, session_id)
    }

    // ==================== Users ====================

    /// User record
    ///
    /// Type: Hash + TTL
    /// Fields: id, name, estimate, joined, `is_admin`, `is_observer`
    #[must_use]
    pub fn user(&self, user_id: &UserId) -> String {
        format!("{}:user:{}", self.prefix, user_id)
    }

    // ==================== Broker Topics ====================

    /// Pub/sub topic carrying a session's events
    #[must_use]
    pub fn session_topic(&self, session_id: &SessionId) -> String {
        format!("{}:topic:{}", self.prefix, session_id)
    }

    /// Inverse of [`Self::session_topic`]
    #[must_use]
    pub fn session_from_topic(&self, topic: &str) -> Option<SessionId> {
        topic
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(":topic:"))
            .filter(|id| !id.is_empty())
            .map(SessionId::from)
    }
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new("ballot")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_keys() {
        let keys = KeyBuilder::default();
        let session = SessionId::from("s1");

        assert_eq!(keys.session_state(&session), "ballot:session:s1:voting");
        assert_eq!(keys.vote_count(&session), "ballot:session:s1:vote_count");
        assert_eq!(keys.tally(&session), "ballot:session:s1:tally");
        assert_eq!(keys.session_voters(&session), "ballot:session:s1:users");
        assert_eq!(keys.session_observers(&session), "ballot:session:s1:observers");
        assert_eq!(keys.user(&UserId::from("u1")), "ballot:user:u1");
    }

    #[test]
    fn test_topic_round_trip() {
        let keys = KeyBuilder::new("test");
        let session = SessionId::from("abc");
        let topic = keys.session_topic(&session);

        assert_eq!(topic, "test:topic:abc");
        assert_eq!(keys.session_from_topic(&topic), Some(session));
        assert_eq!(keys.session_from_topic("other:topic:abc"), None);
        assert_eq!(keys.session_from_topic("test:topic:"), None);
    }
}
