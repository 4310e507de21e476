// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Offending input field, for validation errors
    pub field: Option<String>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            field: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            ..Self::bad_request(message)
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    error: String,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            field: self.field,
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Convert ballot_core errors to HTTP errors
///
/// Only caller mistakes are described to the client; everything else is
/// logged here and answered with an opaque message.
impl From<ballot_core::Error> for AppError {
    fn from(err: ballot_core::Error) -> Self {
        use ballot_core::Error;

        match err {
            Error::Validation { field, message } => Self::validation(field, message),
            e @ (Error::InactiveSession(_) | Error::NotAVoter { .. }) => {
                Self::conflict(e.to_string())
            }
            Error::NotFound(msg) => Self::not_found(format!("Not found: {msg}")),
            Error::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                Self::internal_server_error("Service temporarily unavailable")
            }
            Error::Serialization(e) => {
                tracing::error!("Serialization error: {}", e);
                Self::internal_server_error("Data processing error")
            }
            e @ (Error::Store(_)
            | Error::Broker(_)
            | Error::InvalidEstimate(_)
            | Error::Internal(_)) => {
                tracing::error!("Internal error: {}", e);
                Self::internal_server_error("Internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballot_core::models::SessionId;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ballot_core::Error::validation("user.name", "This field cannot be empty"),
                StatusCode::BAD_REQUEST,
            ),
            (
                ballot_core::Error::InactiveSession(SessionId::from("s")),
                StatusCode::CONFLICT,
            ),
            (
                ballot_core::Error::NotFound("user [u]".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                ballot_core::Error::Store("connection refused".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = AppError::from(ballot_core::Error::Broker("redis://secret-host".to_string()));
        assert_eq!(err.message, "Internal server error");
        assert!(err.field.is_none());
    }
}
