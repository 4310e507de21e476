//! Input validation for names and estimates

use crate::models::UNSURE_ESTIMATE;

/// Maximum display name length (in characters)
pub const DISPLAY_NAME_MAX: usize = 64;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid {field}: {message}")]
    Field { field: String, message: String },
}

/// Validation result
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Display name validator
pub struct DisplayNameValidator {
    max_length: usize,
}

impl Default for DisplayNameValidator {
    fn default() -> Self {
        Self {
            max_length: DISPLAY_NAME_MAX,
        }
    }
}

impl DisplayNameValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    #[must_use]
    pub const fn with_max_length(mut self, max: usize) -> Self {
        self.max_length = max;
        self
    }

    /// Validate a name and return its trimmed form
    pub fn validate<'a>(&self, name: &'a str) -> ValidationResult<&'a str> {
        let name = name.trim();

        if name.is_empty() {
            return Err(ValidationError::Field {
                field: "user.name".to_string(),
                message: "This field cannot be empty".to_string(),
            });
        }

        if name.chars().count() > self.max_length {
            return Err(ValidationError::Field {
                field: "user.name".to_string(),
                message: format!("must be at most {} characters", self.max_length),
            });
        }

        if name.chars().any(char::is_control) {
            return Err(ValidationError::Field {
                field: "user.name".to_string(),
                message: "cannot contain control characters".to_string(),
            });
        }

        Ok(name)
    }
}

/// Check that an estimate is either "unsure" or an integer
pub fn validate_estimate(estimate: &str) -> ValidationResult<()> {
    if estimate == UNSURE_ESTIMATE || estimate.parse::<i64>().is_ok() {
        return Ok(());
    }

    Err(ValidationError::Field {
        field: "estimate".to_string(),
        message: format!("'{estimate}' is not a number or '?'"),
    })
}
