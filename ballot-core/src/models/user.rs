use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::id::UserId;

/// Estimate value of a user who has not voted in the current round
pub const NO_ESTIMATE: &str = "";

/// Estimate value meaning "unsure"
pub const UNSURE_ESTIMATE: &str = "?";

/// Role of a session member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberRole {
    Voter,
    Observer,
}

/// Session participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub estimate: String,
    pub voted: bool,
    /// Join time in nanoseconds since the Unix epoch
    pub joined: i64,
    pub is_observer: bool,
    pub is_admin: bool,
}

impl User {
    #[must_use]
    pub const fn role(&self) -> MemberRole {
        if self.is_observer {
            MemberRole::Observer
        } else {
            MemberRole::Voter
        }
    }

    /// Copy of this user with the estimate blanked out
    #[must_use]
    pub fn with_hidden_estimate(&self) -> Self {
        Self {
            estimate: NO_ESTIMATE.to_string(),
            ..self.clone()
        }
    }

    /// Fields of the user hash in the keyed store
    #[must_use]
    pub fn to_store_fields(&self) -> Vec<(String, String)> {
        vec![
            ("id".to_string(), self.id.to_string()),
            ("name".to_string(), self.name.clone()),
            ("estimate".to_string(), self.estimate.clone()),
            ("joined".to_string(), self.joined.to_string()),
            ("is_admin".to_string(), flag(self.is_admin).to_string()),
            ("is_observer".to_string(), flag(self.is_observer).to_string()),
        ]
    }

    /// Rebuild a user from its store hash. Returns `None` for an empty hash
    /// (missing or expired record).
    #[must_use]
    pub fn from_store_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let id = fields.get("id")?;
        let estimate = fields.get("estimate").cloned().unwrap_or_default();

        Some(Self {
            id: UserId::from_string(id.clone()),
            name: fields.get("name").cloned().unwrap_or_default(),
            voted: estimate != NO_ESTIMATE,
            estimate,
            joined: fields
                .get("joined")
                .and_then(|j| j.parse().ok())
                .unwrap_or_default(),
            is_observer: fields.get("is_observer").is_some_and(|v| v == "1"),
            is_admin: fields.get("is_admin").is_some_and(|v| v == "1"),
        })
    }
}

const fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}
