//! Shared handles injected into every repository.

use std::future::Future;
use std::time::Duration;

use roydental_cache::{CacheBackend, LockManager, LockPolicy};
use roydental_core::{CoreError, EntityDescriptor};
use roydental_storage::{DynStore, StorageError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::allocator::IdAllocator;
use crate::entity_cache::EntityCache;
use crate::error::{RepoError, RepoResult};

/// Repository tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySettings {
    /// Upper bound on every backing-store read, in milliseconds.
    pub read_timeout_ms: u64,
    /// Upper bound on cache entry lifetime, in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: 5000,
            cache_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl RepositorySettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Store, cache, locks and id allocator shared by all repositories.
///
/// Cloning is cheap; every handle is reference counted.
#[derive(Clone)]
pub struct RepoContext {
    pub(crate) store: DynStore,
    pub(crate) cache: EntityCache,
    pub(crate) locks: LockManager,
    pub(crate) ids: IdAllocator,
    pub(crate) read_timeout: Duration,
}

impl RepoContext {
    pub fn new(
        store: DynStore,
        backend: CacheBackend,
        policy: LockPolicy,
        settings: &RepositorySettings,
    ) -> Self {
        Self {
            ids: IdAllocator::new(store.clone()),
            cache: EntityCache::new(backend.clone(), settings.cache_ttl()),
            locks: LockManager::new(backend, policy),
            store,
            read_timeout: settings.read_timeout(),
        }
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Run a store read under the read timeout.
    pub(crate) async fn bounded<T>(
        &self,
        entity: &'static str,
        operation: &'static str,
        read: impl Future<Output = Result<T, StorageError>>,
    ) -> RepoResult<T> {
        match tokio::time::timeout(self.read_timeout, read).await {
            Ok(result) => result.map_err(RepoError::from),
            Err(_) => Err(RepoError::timeout(entity, operation, self.read_timeout)),
        }
    }

    /// Hold `key` for the duration of `op`.
    ///
    /// The lock is released whether `op` succeeds or fails. A failed
    /// release is logged only; the key expires on its own.
    pub(crate) async fn with_lock<T>(
        &self,
        key: &str,
        ttl: Duration,
        op: impl Future<Output = RepoResult<T>>,
    ) -> RepoResult<T> {
        let token = self
            .locks
            .acquire_with_retry(key, ttl)
            .await
            .map_err(|e| RepoError::lock_failed(key, e))?;

        let result = op.await;

        if let Err(e) = self.locks.release(&token).await {
            warn!(key = %key, error = %e, "lock release failed");
        }
        result
    }

    /// Fail with a validation error unless `target` has a row `id`.
    pub(crate) async fn require_exists(
        &self,
        owner: &'static str,
        target: &'static EntityDescriptor,
        id: &str,
    ) -> RepoResult<()> {
        let found = self
            .bounded(owner, "reference check", self.store.read(target.table, id))
            .await?;
        match found {
            Some(_) => Ok(()),
            None => Err(missing_reference(owner, target, id)),
        }
    }
}

pub(crate) fn missing_reference(owner: &'static str, target: &EntityDescriptor, id: &str) -> RepoError {
    CoreError::validation(owner, format!("{} {id} does not exist", target.name)).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use roydental_core::DOCTOR;
    use roydental_db_memory::create_memory_store;

    fn context() -> RepoContext {
        let policy = LockPolicy {
            backoff_ms: 10,
            ..LockPolicy::default()
        };
        RepoContext::new(
            create_memory_store(),
            CacheBackend::new_local(),
            policy,
            &RepositorySettings::default(),
        )
    }

    #[test]
    fn test_default_settings() {
        let settings = RepositorySettings::default();
        assert_eq!(settings.read_timeout(), Duration::from_secs(5));
        assert_eq!(settings.cache_ttl(), Duration::from_secs(604_800));
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let ctx = context();
        let ttl = Duration::from_secs(10);

        let failed: RepoResult<()> = ctx
            .with_lock("doctor_lock:DR-000001", ttl, async {
                Err(RepoError::not_found("doctor", "DR-000001"))
            })
            .await;
        assert!(failed.unwrap_err().is_not_found());

        // Released, so a fresh acquire succeeds immediately
        let token = ctx.locks.acquire("doctor_lock:DR-000001", ttl).await.unwrap();
        assert!(token.is_some());
    }

    #[tokio::test]
    async fn test_with_lock_reports_contention() {
        let ctx = context();
        let ttl = Duration::from_secs(10);
        let _held = ctx.locks.acquire("doctor_lock:DR-000001", ttl).await.unwrap().unwrap();

        let err = ctx
            .with_lock("doctor_lock:DR-000001", ttl, async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::LockAcquisitionFailed { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_require_exists() {
        let ctx = context();
        let err = ctx.require_exists("billing", &DOCTOR, "DR-000404").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid billing: doctor DR-000404 does not exist");
    }
}
