use thiserror::Error;

/// Core error types for domain records.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid {entity}: {message}")]
    Validation {
        entity: &'static str,
        message: String,
    },

    #[error("Invalid {entity} id: {id}")]
    InvalidId { entity: &'static str, id: String },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a new Validation error
    pub fn validation(entity: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            entity,
            message: message.into(),
        }
    }

    /// Create a new InvalidId error
    pub fn invalid_id(entity: &'static str, id: impl Into<String>) -> Self {
        Self::InvalidId {
            entity,
            id: id.into(),
        }
    }

    /// Check if this error was caused by caller input rather than the system
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::InvalidId { .. })
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Rejects empty or whitespace-only values of a required text field.
pub fn require_text(entity: &'static str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CoreError::validation(entity, format!("{field} is required")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display() {
        let err = CoreError::validation("doctor", "first_name is required");
        assert_eq!(err.to_string(), "Invalid doctor: first_name is required");
        assert!(err.is_client_error());
    }

    #[test]
    fn test_require_text() {
        assert!(require_text("doctor", "last_name", "Okafor").is_ok());
        assert!(require_text("doctor", "last_name", "   ").is_err());
    }
}
