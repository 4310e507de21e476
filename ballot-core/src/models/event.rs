use serde::{Deserialize, Serialize};

use super::id::{SessionId, UserId};
use super::session::SessionState;
use super::user::{MemberRole, User};

/// Events delivered to every connection watching a session.
///
/// Published on the session topic by the voting service and the hub, relayed
/// to local connections by every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEvent {
    /// A voter joined the session
    UserAdded(User),

    /// An observer joined the session
    ObserverAdded(User),

    /// A voter cast (or changed) an estimate. The estimate stays hidden.
    UserVoted { user_id: UserId },

    /// A voting round started
    #[serde(rename = "VOTING")]
    VoteStarted,

    /// A voting round finished, estimates revealed
    VoteFinished { users: Vec<User>, tally: String },

    /// Session snapshot sent to a connection that starts watching
    Watching {
        session_state: SessionState,
        users: Vec<User>,
        observers: Vec<User>,
        tally: String,
    },

    /// A voter's connection went away
    UserLeft {
        session_id: SessionId,
        user_id: UserId,
    },

    /// An observer's connection went away
    ObserverLeft {
        session_id: SessionId,
        user_id: UserId,
    },
}

impl SessionEvent {
    /// Departure event for a member with the given role
    #[must_use]
    pub const fn departure(session_id: SessionId, user_id: UserId, role: MemberRole) -> Self {
        match role {
            MemberRole::Voter => Self::UserLeft {
                session_id,
                user_id,
            },
            MemberRole::Observer => Self::ObserverLeft {
                session_id,
                user_id,
            },
        }
    }

    /// Wire name of the event
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::UserAdded(_) => "USER_ADDED",
            Self::ObserverAdded(_) => "OBSERVER_ADDED",
            Self::UserVoted { .. } => "USER_VOTED",
            Self::VoteStarted => "VOTING",
            Self::VoteFinished { .. } => "VOTE_FINISHED",
            Self::Watching { .. } => "WATCHING",
            Self::UserLeft { .. } => "USER_LEFT",
            Self::ObserverLeft { .. } => "OBSERVER_LEFT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NO_ESTIMATE;

    #[test]
    fn test_event_tags_match_event_type() {
        let events = vec![
            SessionEvent::UserVoted {
                user_id: UserId::from_string("u1".to_string()),
            },
            SessionEvent::VoteStarted,
            SessionEvent::VoteFinished {
                users: vec![],
                tally: "?".to_string(),
            },
            SessionEvent::departure(
                SessionId::from_string("s1".to_string()),
                UserId::from_string("u1".to_string()),
                MemberRole::Observer,
            ),
        ];

        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["event"], event.event_type());
        }
    }

    #[test]
    fn test_user_added_flattens_user_fields() {
        let event = SessionEvent::UserAdded(User {
            id: UserId::from_string("u1".to_string()),
            name: "Bob".to_string(),
            estimate: NO_ESTIMATE.to_string(),
            voted: false,
            joined: 42,
            is_observer: false,
            is_admin: false,
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "USER_ADDED");
        assert_eq!(value["id"], "u1");
        assert_eq!(value["name"], "Bob");

        let parsed: SessionEvent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_user_voted_has_no_estimate() {
        let json = serde_json::to_string(&SessionEvent::UserVoted {
            user_id: UserId::from_string("u1".to_string()),
        })
        .unwrap();
        assert!(!json.contains("estimate"));
    }

    #[test]
    fn test_parse_user_left() {
        let parsed: SessionEvent =
            serde_json::from_str(r#"{"event":"USER_LEFT","session_id":"s1","user_id":"u9"}"#)
                .unwrap();
        assert_eq!(
            parsed,
            SessionEvent::UserLeft {
                session_id: SessionId::from_string("s1".to_string()),
                user_id: UserId::from_string("u9".to_string()),
            }
        );
    }
}
