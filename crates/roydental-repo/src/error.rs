use std::fmt;
use std::time::Duration;

use roydental_cache::LockError;
use roydental_core::CoreError;
use roydental_storage::{ErrorCategory, StorageError};
use thiserror::Error;

/// Outcome of the compensating counter rewind after a failed create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdRollback {
    /// No id had been allocated when the failure happened.
    NotAttempted,
    /// The counter was rewound; the id will be issued again.
    Rewound,
    /// The counter had already moved on; the id is left as a gap.
    Gap,
    /// The rewind itself failed; the id is left as a gap.
    Failed(String),
}

impl fmt::Display for IdRollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAttempted => f.write_str("not attempted"),
            Self::Rewound => f.write_str("rewound"),
            Self::Gap => f.write_str("gap left"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Errors returned by entity repositories.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Could not lock {key}: {source}")]
    LockAcquisitionFailed {
        key: String,
        #[source]
        source: LockError,
    },

    #[error("{entity} already exists: {key}")]
    DuplicateEntity { entity: &'static str, key: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Failed to persist {entity}: {source} (id rollback: {rollback})")]
    PersistenceFailed {
        entity: &'static str,
        #[source]
        source: StorageError,
        rollback: IdRollback,
    },

    #[error("{operation} on {entity} timed out after {}ms", .after.as_millis())]
    Timeout {
        entity: &'static str,
        operation: &'static str,
        after: Duration,
    },

    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RepoError {
    pub fn lock_failed(key: impl Into<String>, source: LockError) -> Self {
        Self::LockAcquisitionFailed {
            key: key.into(),
            source,
        }
    }

    pub fn duplicate(entity: &'static str, key: impl Into<String>) -> Self {
        Self::DuplicateEntity {
            entity,
            key: key.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn persistence(entity: &'static str, source: StorageError, rollback: IdRollback) -> Self {
        Self::PersistenceFailed {
            entity,
            source,
            rollback,
        }
    }

    pub fn timeout(entity: &'static str, operation: &'static str, after: Duration) -> Self {
        Self::Timeout {
            entity,
            operation,
            after,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateEntity { .. })
    }

    /// Whether the caller may retry the same request unchanged.
    ///
    /// Lock conflicts and timeouts are transient; duplicates, validation
    /// failures and persistence failures need different input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockAcquisitionFailed { .. } | Self::Timeout { .. }
        )
    }

    /// Category for mapping to caller-facing responses.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::LockAcquisitionFailed { .. } | Self::DuplicateEntity { .. } => {
                ErrorCategory::Conflict
            }
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::PersistenceFailed { .. } => ErrorCategory::Transaction,
            Self::Timeout { .. } => ErrorCategory::Infrastructure,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Storage(e) => e.category(),
            Self::Serialization(_) => ErrorCategory::Internal,
        }
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        let lock = RepoError::lock_failed(
            "doctor_lock:DR-000007",
            LockError::Exhausted {
                key: "doctor_lock:DR-000007".into(),
                attempts: 3,
            },
        );
        assert!(lock.is_retryable());
        assert_eq!(lock.category(), ErrorCategory::Conflict);

        let timeout = RepoError::timeout("patient", "read", Duration::from_secs(5));
        assert!(timeout.is_retryable());
        assert_eq!(timeout.to_string(), "read on patient timed out after 5000ms");

        assert!(!RepoError::duplicate("doctor", "Ama_Owusu").is_retryable());
        assert!(!RepoError::not_found("patient", "DP-000001").is_retryable());
        assert!(!RepoError::from(CoreError::validation("doctor", "first_name is required")).is_retryable());
    }

    #[test]
    fn test_persistence_failed_display() {
        let err = RepoError::persistence(
            "patient",
            StorageError::already_exists("patient", "DP-000001"),
            IdRollback::Rewound,
        );
        assert!(err.to_string().ends_with("(id rollback: rewound)"));
        assert_eq!(err.category(), ErrorCategory::Transaction);
    }
}
