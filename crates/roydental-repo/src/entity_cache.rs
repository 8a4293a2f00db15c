//! Read-through cache for entities and entity collections.
//!
//! Values are stored as named MessagePack maps. A payload that no longer
//! decodes (schema drift, truncated write) is dropped and reported as a
//! miss, so the next read repopulates it from the store.
//!
//! ## Invalidation order
//!
//! Every mutation deletes, in this order: the record key, the collection
//! key, then the parent's record key and the parent's collection key. An
//! interrupted invalidation can only leave extra misses behind.

use std::time::Duration;

use roydental_cache::{CacheBackend, CacheStats};
use roydental_core::EntityDescriptor;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Typed view over the shared cache backend.
#[derive(Debug, Clone)]
pub struct EntityCache {
    backend: CacheBackend,
    max_ttl: Duration,
}

impl EntityCache {
    /// `max_ttl` caps the per-descriptor TTL.
    pub fn new(backend: CacheBackend, max_ttl: Duration) -> Self {
        Self { backend, max_ttl }
    }

    pub fn backend(&self) -> &CacheBackend {
        &self.backend
    }

    pub fn ttl_for(&self, descriptor: &EntityDescriptor) -> Duration {
        descriptor.ttl.min(self.max_ttl)
    }

    /// Decode the value under `key`. Misses, backend errors and corrupt
    /// payloads all return `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let Some(data) = self.backend.get(key).await else {
            debug!(key = %key, "cache miss");
            return None;
        };
        match rmp_serde::from_slice::<T>(&data) {
            Ok(value) => {
                debug!(key = %key, "cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to deserialize cached entry");
                self.backend.delete(key).await;
                None
            }
        }
    }

    /// Store `value` under `key` with the descriptor's TTL.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        descriptor: &EntityDescriptor,
        key: &str,
        value: &T,
    ) {
        match rmp_serde::to_vec_named(value) {
            Ok(data) => self.backend.set(key, data, self.ttl_for(descriptor)).await,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize entry for cache");
            }
        }
    }

    /// Drop every key a mutation of one record can make stale.
    pub async fn invalidate(&self, descriptor: &EntityDescriptor, id: &str, parent_id: Option<&str>) {
        match descriptor.cache_key(parent_id, id) {
            Some(key) => self.backend.delete(&key).await,
            None => {
                // Parent unknown: sweep every parent's copy of this id
                let pattern = format!("{}:*:{id}", descriptor.cache_prefix);
                self.backend.delete_matching(&pattern).await;
            }
        }
        self.backend.delete(descriptor.collection_key).await;

        if let (Some(link), Some(parent)) = (descriptor.parent, parent_id) {
            if let Some(parent_key) = link.entity.cache_key(None, parent) {
                self.backend.delete(&parent_key).await;
            }
            self.backend.delete(link.entity.collection_key).await;
        }
        debug!(entity = %descriptor, id = %id, "cache invalidated");
    }

    pub async fn delete(&self, key: &str) {
        self.backend.delete(key).await;
    }

    /// Delete every key matching a glob pattern; returns how many went.
    pub async fn delete_matching(&self, pattern: &str) -> usize {
        self.backend.delete_matching(pattern).await
    }

    pub fn stats(&self) -> CacheStats {
        self.backend.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roydental_core::{
        DEFAULT_CACHE_TTL, DOCTOR, Doctor, EMERGENCY_CONTACT, EmergencyContact, PATIENT,
    };

    fn cache() -> EntityCache {
        EntityCache::new(CacheBackend::new_local(), DEFAULT_CACHE_TTL)
    }

    #[tokio::test]
    async fn test_roundtrip_and_empty_collection() {
        let cache = cache();
        let mut doctor = Doctor::new("Ama", "Owusu");
        doctor.id = "DR-000001".into();

        cache.put(&DOCTOR, "doctor_cache:DR-000001", &doctor).await;
        let hit: Option<Doctor> = cache.get("doctor_cache:DR-000001").await;
        assert_eq!(hit, Some(doctor));

        // An empty collection is a hit, not a miss
        cache.put(&DOCTOR, "doctors_cache", &Vec::<Doctor>::new()).await;
        let all: Option<Vec<Doctor>> = cache.get("doctors_cache").await;
        assert_eq!(all, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_dropped() {
        let cache = cache();
        cache
            .backend()
            .set("doctor_cache:DR-000001", vec![0xc1, 0xff], Duration::from_secs(60))
            .await;

        let hit: Option<Doctor> = cache.get("doctor_cache:DR-000001").await;
        assert!(hit.is_none());
        assert!(cache.backend().get("doctor_cache:DR-000001").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_dependent_clears_parent_keys() {
        let cache = cache();
        let contact = EmergencyContact::new("DP-000001", "Kwame", "0700111222", "Brother");
        let keys = [
            "emergency_contact_cache:DP-000001:4",
            "emergency_contacts_cache",
            "patient_cache:DP-000001",
            "patients_cache",
            "patient_cache:DP-000002",
        ];
        for key in keys {
            cache.put(&EMERGENCY_CONTACT, key, &contact).await;
        }

        cache.invalidate(&EMERGENCY_CONTACT, "4", Some("DP-000001")).await;

        for key in &keys[..4] {
            assert!(cache.backend().get(key).await.is_none(), "{key} survived");
        }
        assert!(cache.backend().get("patient_cache:DP-000002").await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_without_parent_sweeps_by_id() {
        let cache = cache();
        let contact = EmergencyContact::new("DP-000001", "Kwame", "0700111222", "Brother");
        cache.put(&EMERGENCY_CONTACT, "emergency_contact_cache:DP-000001:4", &contact).await;
        cache.put(&EMERGENCY_CONTACT, "emergency_contact_cache:DP-000001:5", &contact).await;

        cache.invalidate(&EMERGENCY_CONTACT, "4", None).await;

        let gone: Option<EmergencyContact> = cache.get("emergency_contact_cache:DP-000001:4").await;
        let kept: Option<EmergencyContact> = cache.get("emergency_contact_cache:DP-000001:5").await;
        assert!(gone.is_none());
        assert!(kept.is_some());
    }

    #[test]
    fn test_ttl_is_capped() {
        let capped = EntityCache::new(CacheBackend::new_local(), Duration::from_secs(60));
        assert_eq!(capped.ttl_for(&PATIENT), Duration::from_secs(60));
        assert_eq!(cache().ttl_for(&PATIENT), DEFAULT_CACHE_TTL);
    }
}
