use thiserror::Error;

use crate::models::{SessionId, UserId};
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("not voting yet for session [{0}]")]
    InactiveSession(SessionId),

    #[error("user [{user_id}] is not a voter in session [{session_id}]")]
    NotAVoter {
        session_id: SessionId,
        user_id: UserId,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid estimate: {0}")]
    InvalidEstimate(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the error was caused by the caller (bad input or wrong session
    /// state) rather than by infrastructure
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::InactiveSession(_)
                | Self::NotAVoter { .. }
                | Self::NotFound(_)
        )
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Field { field, message } => Self::Validation { field, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
