//! Redis-mode tests against a real server.
//!
//! Requires a container runtime for testcontainers.

use std::time::Duration;

use roydental_cache::{CacheBackend, LockError, LockManager, LockPolicy, RedisConfig, create_cache_backend};
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::Redis;

async fn start() -> (ContainerAsync<Redis>, CacheBackend) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start Redis container");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get port");

    let backend = create_cache_backend(&RedisConfig::new(format!("redis://127.0.0.1:{port}"))).await;
    assert_eq!(backend.mode(), "redis");
    (container, backend)
}

#[tokio::test]
async fn test_redis_cache_roundtrip_and_scan_delete() {
    let (_container, cache) = start().await;
    let ttl = Duration::from_secs(60);

    for i in 0..250 {
        cache
            .set(&format!("examination_cache:DP-000001:{i}"), vec![1, 2, 3], ttl)
            .await;
    }
    cache.set("examinations_cache", Vec::new(), ttl).await;

    assert_eq!(
        cache.get("examination_cache:DP-000001:7").await.unwrap().as_slice(),
        &[1, 2, 3]
    );
    // Empty payloads are distinct from a miss
    assert!(cache.get("examinations_cache").await.unwrap().is_empty());

    let removed = cache.delete_matching("examination_cache:DP-000001:*").await;
    assert_eq!(removed, 250);
    assert!(cache.get("examination_cache:DP-000001:7").await.is_none());
    assert!(cache.get("examinations_cache").await.is_some());

    cache.delete("examinations_cache").await;
    assert!(cache.get("examinations_cache").await.is_none());
}

#[tokio::test]
async fn test_redis_lock_owner_checks() {
    let (_container, cache) = start().await;
    let locks = LockManager::new(
        cache,
        LockPolicy {
            backoff_ms: 10,
            ..LockPolicy::default()
        },
    );

    let held = locks
        .acquire("doctor_lock:DR-000007", Duration::from_millis(200))
        .await
        .unwrap()
        .unwrap();
    assert!(locks
        .acquire("doctor_lock:DR-000007", Duration::from_secs(5))
        .await
        .unwrap()
        .is_none());

    // Let it expire and be taken over
    tokio::time::sleep(Duration::from_millis(300)).await;
    let next = locks
        .acquire_with_retry("doctor_lock:DR-000007", Duration::from_secs(5))
        .await
        .unwrap();

    assert!(matches!(
        locks.release(&held).await,
        Err(LockError::NotOwner { .. })
    ));
    locks.release(&next).await.unwrap();
}
