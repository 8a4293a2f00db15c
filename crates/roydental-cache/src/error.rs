//! Error types for the cache and lock layer.

use thiserror::Error;

/// Failures talking to the shared key-value store.
///
/// Plain cache operations absorb these and log them; only the lock
/// primitives hand them back to the caller.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache command failed: {0}")]
    Command(#[from] redis::RedisError),

    #[error("Cache payload serialization error: {0}")]
    Serialization(String),
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

/// Lock manager errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// The stored owner token no longer matches; the lock expired and may
    /// have been taken by someone else.
    #[error("Not the lock owner: {key}")]
    NotOwner { key: String },

    /// Every attempt found the lock held.
    #[error("Lock {key} still held after {attempts} attempts")]
    Exhausted { key: String, attempts: u32 },

    #[error("Lock backend error: {0}")]
    Backend(#[from] CacheError),
}

impl LockError {
    /// Check if the caller may retry the whole operation later
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::Exhausted { .. } | LockError::Backend(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_error_display() {
        let err = LockError::NotOwner {
            key: "doctor_lock:DR-000007".into(),
        };
        assert_eq!(err.to_string(), "Not the lock owner: doctor_lock:DR-000007");
        assert!(!err.is_retryable());

        let err = LockError::Exhausted {
            key: "doctor_lock:DR-000007".into(),
            attempts: 3,
        };
        assert!(err.to_string().contains("after 3 attempts"));
        assert!(err.is_retryable());
    }
}
