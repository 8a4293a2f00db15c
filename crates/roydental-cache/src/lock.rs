//! Owner-tagged locks on top of the cache backend.
//!
//! A lock is a key holding a random owner token with an expiry. Acquire is
//! an atomic set-if-absent; release deletes the key only while it still
//! holds the caller's token, so a holder whose lock expired and was taken
//! over can never release the new holder's lock.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::CacheBackend;
use crate::error::LockError;

/// Retry and expiry policy for lock acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockPolicy {
    /// Total attempts before giving up.
    pub attempts: u32,
    /// Fixed pause between attempts, in milliseconds.
    pub backoff_ms: u64,
    /// Expiry of routine per-record locks, in seconds.
    pub record_ttl_secs: u64,
    /// Expiry of locks guarding cross-entity operations, in seconds.
    pub aggregate_ttl_secs: u64,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 2000,
            record_ttl_secs: 10,
            aggregate_ttl_secs: 60,
        }
    }
}

impl LockPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs)
    }

    pub fn aggregate_ttl(&self) -> Duration {
        Duration::from_secs(self.aggregate_ttl_secs)
    }
}

/// Proof of a held lock; pass it back to [`LockManager::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub key: String,
    pub owner: String,
    pub ttl: Duration,
}

/// Acquires and releases owner-tagged locks.
#[derive(Debug, Clone)]
pub struct LockManager {
    backend: CacheBackend,
    policy: LockPolicy,
}

impl LockManager {
    pub fn new(backend: CacheBackend, policy: LockPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    /// Single attempt. `Ok(None)` means another owner holds the key.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, LockError> {
        let owner = Uuid::new_v4().to_string();
        if self.backend.set_nx(key, &owner, ttl).await? {
            debug!(key = %key, owner = %owner, ttl_ms = ttl.as_millis() as u64, "lock acquired");
            Ok(Some(LockToken {
                key: key.to_string(),
                owner,
                ttl,
            }))
        } else {
            debug!(key = %key, "lock held by another owner");
            Ok(None)
        }
    }

    /// Acquire with the configured number of attempts and fixed backoff.
    ///
    /// Backend errors count as failed attempts. Gives up with
    /// `LockError::Exhausted` once every attempt failed.
    pub async fn acquire_with_retry(&self, key: &str, ttl: Duration) -> Result<LockToken, LockError> {
        let attempts = self.policy.attempts.max(1);
        for attempt in 1..=attempts {
            match self.acquire(key, ttl).await {
                Ok(Some(token)) => return Ok(token),
                Ok(None) => {}
                Err(e) => warn!(key = %key, attempt, error = %e, "lock attempt failed"),
            }
            if attempt < attempts {
                debug!(key = %key, attempt, backoff_ms = self.policy.backoff_ms, "lock busy, backing off");
                tokio::time::sleep(self.policy.backoff()).await;
            }
        }
        Err(LockError::Exhausted {
            key: key.to_string(),
            attempts,
        })
    }

    /// Release a held lock.
    ///
    /// Fails with `LockError::NotOwner` if the key no longer holds this
    /// token; nothing is deleted in that case.
    pub async fn release(&self, token: &LockToken) -> Result<(), LockError> {
        if self
            .backend
            .compare_and_delete(&token.key, &token.owner)
            .await?
        {
            debug!(key = %token.key, "lock released");
            Ok(())
        } else {
            Err(LockError::NotOwner {
                key: token.key.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy() -> LockPolicy {
        LockPolicy {
            attempts: 3,
            backoff_ms: 20,
            ..LockPolicy::default()
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = LockPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.backoff(), Duration::from_secs(2));
        assert_eq!(policy.record_ttl(), Duration::from_secs(10));
        assert_eq!(policy.aggregate_ttl(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let locks = LockManager::new(CacheBackend::new_local(), fast_policy());
        let ttl = Duration::from_secs(10);

        let held = locks.acquire("doctor_lock:DR-000007", ttl).await.unwrap();
        assert!(held.is_some());
        assert!(locks.acquire("doctor_lock:DR-000007", ttl).await.unwrap().is_none());
        // Different keys never contend
        assert!(locks.acquire("doctor_lock:DR-000008", ttl).await.unwrap().is_some());

        locks.release(&held.unwrap()).await.unwrap();
        assert!(locks.acquire("doctor_lock:DR-000007", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_by_non_owner_fails() {
        let locks = LockManager::new(CacheBackend::new_local(), fast_policy());
        let held = locks
            .acquire("patient_lock:DP-000001", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        let forged = LockToken {
            owner: "someone-else".into(),
            ..held.clone()
        };
        let err = locks.release(&forged).await.unwrap_err();
        assert!(matches!(err, LockError::NotOwner { .. }));

        // The real holder is unaffected
        locks.release(&held).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_after_expiry_and_takeover() {
        let locks = LockManager::new(CacheBackend::new_local(), fast_policy());
        let first = locks
            .acquire("billing_lock:PB-000001", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let second = locks
            .acquire("billing_lock:PB-000001", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            locks.release(&first).await,
            Err(LockError::NotOwner { .. })
        ));
        locks.release(&second).await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let locks = LockManager::new(CacheBackend::new_local(), fast_policy());
        let ttl = Duration::from_secs(10);
        let _held = locks.acquire("k", ttl).await.unwrap().unwrap();

        let started = std::time::Instant::now();
        let err = locks.acquire_with_retry("k", ttl).await.unwrap_err();
        assert!(matches!(err, LockError::Exhausted { attempts: 3, .. }));
        // Two pauses between three attempts
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_retry_succeeds_once_released() {
        let locks = LockManager::new(CacheBackend::new_local(), fast_policy());
        let ttl = Duration::from_secs(10);
        let held = locks.acquire("k", ttl).await.unwrap().unwrap();

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire_with_retry("k", ttl).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        locks.release(&held).await.unwrap();

        let token = contender.await.unwrap().unwrap();
        assert_eq!(token.key, "k");
        assert_ne!(token.owner, held.owner);
    }
}
