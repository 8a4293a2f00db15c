//! Shared cache and lock layer.
//!
//! ## Modes
//!
//! - **Local**: In-memory DashMap, single instance only
//! - **Redis**: Shared across instances through a deadpool connection pool
//!
//! ## Graceful Degradation
//!
//! If Redis is disabled or unreachable at startup, [`create_cache_backend`]
//! falls back to local mode. At runtime, cache reads that fail count as
//! misses and failed writes are logged, so the backing store always stays
//! the source of truth.

pub mod backend;
pub mod config;
pub mod error;
pub mod lock;
mod pattern;

use std::time::Duration;

pub use backend::{CacheBackend, CacheStats, CachedEntry};
pub use config::RedisConfig;
pub use error::{CacheError, LockError};
pub use lock::{LockManager, LockPolicy, LockToken};
pub use pattern::glob_match;

/// Create a Redis pool without checking that the server answers.
pub fn create_redis_pool(config: &RedisConfig) -> Result<deadpool_redis::Pool, CacheError> {
    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let timeout = Duration::from_millis(config.timeout_ms);
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size.max(1));
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);
    redis_config.pool = Some(pool_config);

    redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| CacheError::Unavailable(e.to_string()))
}

/// Create the cache backend from configuration.
///
/// Falls back to local mode if Redis is disabled, the pool cannot be
/// built, or the first connection fails.
pub async fn create_cache_backend(config: &RedisConfig) -> CacheBackend {
    if !config.enabled {
        tracing::info!("Redis disabled, using local cache and locks");
        return CacheBackend::new_local();
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let pool = match create_redis_pool(config) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            return CacheBackend::new_local();
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis successfully");
            CacheBackend::new_redis(pool)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to local cache (single instance only)."
            );
            CacheBackend::new_local()
        }
    }
}
