//! Cache backend implementation with a local (DashMap) and a shared (Redis) mode.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use deadpool_redis::Pool;
use redis::AsyncCommands;

use crate::error::CacheError;
use crate::pattern::glob_match;

/// Keys deleted per SCAN page in Redis mode.
const SCAN_BATCH: usize = 100;

/// Deletes the key only if it still holds the caller's token.
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// A cached entry with TTL support.
///
/// The data is wrapped in `Arc` to allow cheap cloning on cache hits.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    /// Create a new cached entry.
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    /// Check if this entry has expired.
    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Shared key-value backend for cache entries and locks.
///
/// ## Modes
///
/// - **Local**: Single-instance mode using only DashMap. Locks only
///   exclude callers inside this process.
/// - **Redis**: Multi-instance mode; every instance sees the same entries
///   and locks.
///
/// Cache reads and writes never fail: transport errors are logged and a
/// read degrades to a miss. The lock primitives (`set_nx`,
/// `compare_and_delete`) report errors, since silently "acquiring" a lock
/// that was never written would break mutual exclusion.
#[derive(Clone)]
pub enum CacheBackend {
    /// Single-instance: local DashMap only
    Local(Arc<DashMap<String, CachedEntry>>),

    /// Multi-instance: Redis
    Redis { pool: Pool },
}

impl std::fmt::Debug for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CacheBackend").field(&self.mode()).finish()
    }
}

impl CacheBackend {
    /// Create a new local-only cache backend.
    pub fn new_local() -> Self {
        CacheBackend::Local(Arc::new(DashMap::new()))
    }

    /// Create a new Redis-backed cache backend.
    pub fn new_redis(pool: Pool) -> Self {
        CacheBackend::Redis { pool }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            CacheBackend::Local(_) => "local",
            CacheBackend::Redis { .. } => "redis",
        }
    }

    /// Get a value from the cache.
    ///
    /// Expired entries, missing keys and transport errors all read as
    /// `None`. An empty stored value is still `Some`.
    pub async fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        match self {
            CacheBackend::Local(map) => {
                let result = match map.get(key) {
                    Some(entry) if !entry.is_expired() => Some(Arc::clone(&entry.data)),
                    Some(entry) => {
                        drop(entry);
                        map.remove_if(key, |_, e| e.is_expired());
                        None
                    }
                    None => None,
                };
                tracing::debug!(key = %key, hit = result.is_some(), "cache lookup (local)");
                result
            }
            CacheBackend::Redis { pool } => match pool.get().await {
                Ok(mut conn) => match conn.get::<_, Option<Vec<u8>>>(key).await {
                    Ok(Some(data)) => {
                        tracing::debug!(key = %key, "cache hit");
                        Some(Arc::new(data))
                    }
                    Ok(None) => {
                        tracing::debug!(key = %key, "cache miss");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Redis GET error");
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to get Redis connection");
                    None
                }
            },
        }
    }

    /// Set a value in the cache with TTL.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        match self {
            CacheBackend::Local(map) => {
                map.insert(key.to_string(), CachedEntry::new(value, ttl));
            }
            CacheBackend::Redis { pool } => {
                let ttl_secs = ttl.as_secs().max(1);
                let result = match pool.get().await {
                    Ok(mut conn) => conn
                        .set_ex::<_, _, ()>(key, value, ttl_secs)
                        .await
                        .map_err(CacheError::from),
                    Err(e) => Err(CacheError::from(e)),
                };
                match result {
                    Ok(()) => tracing::debug!(key = %key, ttl_secs, "cache set"),
                    Err(e) => tracing::warn!(key = %key, error = %e, "Redis SET error"),
                }
            }
        }
    }

    /// Remove a single key.
    pub async fn delete(&self, key: &str) {
        match self {
            CacheBackend::Local(map) => {
                map.remove(key);
                tracing::debug!(key = %key, "cache invalidated (local)");
            }
            CacheBackend::Redis { pool } => {
                let result = match pool.get().await {
                    Ok(mut conn) => conn.del::<_, ()>(key).await.map_err(CacheError::from),
                    Err(e) => Err(CacheError::from(e)),
                };
                match result {
                    Ok(()) => tracing::debug!(key = %key, "cache invalidated"),
                    Err(e) => tracing::warn!(key = %key, error = %e, "Redis DEL error"),
                }
            }
        }
    }

    /// Remove every key matching a glob pattern; returns how many went.
    ///
    /// Redis mode walks the keyspace with a `SCAN` cursor and deletes page
    /// by page, so memory stays bounded and the server is never blocked by
    /// a full `KEYS` listing.
    pub async fn delete_matching(&self, pattern: &str) -> usize {
        match self {
            CacheBackend::Local(map) => {
                let before = map.len();
                map.retain(|key, _| !glob_match(pattern, key));
                let removed = before.saturating_sub(map.len());
                tracing::debug!(pattern = %pattern, removed, "cache pattern invalidated (local)");
                removed
            }
            CacheBackend::Redis { pool } => match self.scan_delete(pool, pattern).await {
                Ok(removed) => {
                    tracing::debug!(pattern = %pattern, removed, "cache pattern invalidated");
                    removed
                }
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "Redis SCAN/DEL error");
                    0
                }
            },
        }
    }

    async fn scan_delete(&self, pool: &Pool, pattern: &str) -> Result<usize, CacheError> {
        let mut conn = pool.get().await?;
        let mut cursor: u64 = 0;
        let mut removed = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let deleted: usize = conn.del(&keys).await?;
                removed += deleted;
            }
            if next == 0 {
                return Ok(removed);
            }
            cursor = next;
        }
    }

    /// Atomically store `value` under `key` with a TTL, only if the key is
    /// absent (or expired). Returns whether the value was stored.
    pub async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        match self {
            CacheBackend::Local(map) => {
                let entry = CachedEntry::new(value.as_bytes().to_vec(), ttl);
                match map.entry(key.to_string()) {
                    Entry::Occupied(mut held) => {
                        if held.get().is_expired() {
                            held.insert(entry);
                            Ok(true)
                        } else {
                            Ok(false)
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(entry);
                        Ok(true)
                    }
                }
            }
            CacheBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                let reply: Option<String> = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut conn)
                    .await?;
                Ok(reply.is_some())
            }
        }
    }

    /// Atomically delete `key` only if it currently holds `value`.
    ///
    /// Returns `false` when the key is gone, expired, or holds another
    /// value; nothing is deleted in that case.
    pub async fn compare_and_delete(&self, key: &str, value: &str) -> Result<bool, CacheError> {
        match self {
            CacheBackend::Local(map) => Ok(map
                .remove_if(key, |_, entry| {
                    !entry.is_expired() && entry.data.as_slice() == value.as_bytes()
                })
                .is_some()),
            CacheBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                let deleted: i64 = redis::Script::new(COMPARE_AND_DELETE)
                    .key(key)
                    .arg(value)
                    .invoke_async(&mut conn)
                    .await?;
                Ok(deleted == 1)
            }
        }
    }

    /// Check the backend answers (for health checks).
    pub async fn ping(&self) -> Result<(), CacheError> {
        match self {
            CacheBackend::Local(_) => Ok(()),
            CacheBackend::Redis { pool } => {
                let mut conn = pool.get().await?;
                let _: String = redis::cmd("PING").query_async(&mut conn).await?;
                Ok(())
            }
        }
    }

    /// Drop every pooled Redis connection.
    pub fn close(&self) {
        if let CacheBackend::Redis { pool } = self {
            pool.close();
        }
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        match self {
            CacheBackend::Local(map) => CacheStats {
                local_entries: Some(map.len()),
                mode: self.mode(),
            },
            CacheBackend::Redis { .. } => CacheStats {
                local_entries: None,
                mode: self.mode(),
            },
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Entry count in local mode; Redis mode keeps nothing locally.
    pub local_entries: Option<usize>,
    pub mode: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_set_get_delete() {
        let cache = CacheBackend::new_local();
        cache
            .set("doctor_cache:DR-000001", b"payload".to_vec(), Duration::from_secs(60))
            .await;

        let hit = cache.get("doctor_cache:DR-000001").await.unwrap();
        assert_eq!(hit.as_slice(), b"payload");

        cache.delete("doctor_cache:DR-000001").await;
        assert!(cache.get("doctor_cache:DR-000001").await.is_none());
    }

    #[tokio::test]
    async fn test_local_empty_value_is_a_hit() {
        let cache = CacheBackend::new_local();
        cache.set("doctors_cache", Vec::new(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("doctors_cache").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_local_expiry() {
        let cache = CacheBackend::new_local();
        cache.set("k", b"v".to_vec(), Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.stats().local_entries, Some(0));
    }

    #[tokio::test]
    async fn test_local_delete_matching() {
        let cache = CacheBackend::new_local();
        let ttl = Duration::from_secs(60);
        cache.set("patient_cache:DP-000001", b"a".to_vec(), ttl).await;
        cache.set("patient_cache:DP-000002", b"b".to_vec(), ttl).await;
        cache.set("patients_cache", b"c".to_vec(), ttl).await;

        assert_eq!(cache.delete_matching("patient_cache:*").await, 2);
        assert!(cache.get("patient_cache:DP-000001").await.is_none());
        assert!(cache.get("patients_cache").await.is_some());
    }

    #[tokio::test]
    async fn test_local_set_nx_and_compare_and_delete() {
        let cache = CacheBackend::new_local();
        let ttl = Duration::from_secs(10);

        assert!(cache.set_nx("doctor_lock:DR-000007", "owner-a", ttl).await.unwrap());
        assert!(!cache.set_nx("doctor_lock:DR-000007", "owner-b", ttl).await.unwrap());

        // A non-holder cannot release
        assert!(!cache.compare_and_delete("doctor_lock:DR-000007", "owner-b").await.unwrap());
        assert!(cache.compare_and_delete("doctor_lock:DR-000007", "owner-a").await.unwrap());
        assert!(!cache.compare_and_delete("doctor_lock:DR-000007", "owner-a").await.unwrap());

        assert!(cache.set_nx("doctor_lock:DR-000007", "owner-b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_set_nx_takes_expired_lock() {
        let cache = CacheBackend::new_local();
        assert!(cache.set_nx("l", "a", Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.set_nx("l", "b", Duration::from_secs(10)).await.unwrap());
        // The expired holder's token no longer matches
        assert!(!cache.compare_and_delete("l", "a").await.unwrap());
    }

    #[test]
    fn test_cached_entry_expiry() {
        let entry = CachedEntry::new(vec![1], Duration::from_secs(60));
        assert!(!entry.is_expired());
        let entry = CachedEntry::new(vec![1], Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        assert!(entry.is_expired());
    }
}
