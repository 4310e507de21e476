use serde::{Deserialize, Serialize};

use super::id::{SessionId, UserId};

/// A planning session as returned to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
}

/// Voting state of a session
///
/// Serialized as the integer stored in the keyed store and sent on the wire
/// (`0` = not voting, `1` = voting).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SessionState {
    #[default]
    NotVoting,
    Voting,
}

impl SessionState {
    #[must_use]
    pub const fn is_voting(self) -> bool {
        matches!(self, Self::Voting)
    }

    /// Value written to the store
    #[must_use]
    pub const fn as_store_value(self) -> &'static str {
        match self {
            Self::NotVoting => "0",
            Self::Voting => "1",
        }
    }

    /// Parse a stored value. Missing or unknown values read as `NotVoting`.
    #[must_use]
    pub fn from_store_value(value: Option<&str>) -> Self {
        match value {
            Some("1") => Self::Voting,
            _ => Self::NotVoting,
        }
    }
}

impl From<SessionState> for u8 {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::NotVoting => 0,
            SessionState::Voting => 1,
        }
    }
}

impl TryFrom<u8> for SessionState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NotVoting),
            1 => Ok(Self::Voting),
            other => Err(format!("invalid session state: {other}")),
        }
    }
}

/// Acknowledgement of a cast vote.
///
/// Carries no estimate so hidden votes never leak through the HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingVote {
    pub session_id: SessionId,
    pub user_id: UserId,
}
