//! Process-owned handles: backing store, cache and repositories.

use std::sync::Arc;

use anyhow::Context;
use roydental_cache::{CacheBackend, create_cache_backend};
use roydental_core::ALL_DESCRIPTORS;
use roydental_db_memory::create_memory_store;
use roydental_db_postgres::{DynPostgresStorage, create_storage, mask_password};
use roydental_repo::{RepoContext, Repositories};
use roydental_storage::DynStore;

use crate::config::AppConfig;

/// Tables of every entity type.
pub fn entity_tables() -> Vec<&'static str> {
    ALL_DESCRIPTORS.iter().map(|d| d.table).collect()
}

/// Id counters of every entity type.
pub fn entity_sequences() -> Vec<&'static str> {
    ALL_DESCRIPTORS.iter().map(|d| d.id_scheme.sequence()).collect()
}

pub struct Services {
    pub store: DynStore,
    /// Set when PostgreSQL is the backing store.
    pub postgres: Option<DynPostgresStorage>,
    pub cache: CacheBackend,
    pub repos: Repositories,
}

impl Services {
    pub async fn init(cfg: &AppConfig) -> anyhow::Result<Self> {
        let (store, postgres) = match cfg.storage.postgres.clone() {
            Some(pg) => {
                tracing::info!(url = %mask_password(&pg.url), "Connecting to PostgreSQL");
                let storage = create_storage(pg, &entity_tables(), &entity_sequences())
                    .await
                    .context("PostgreSQL storage initialization failed")?;
                let store: DynStore = storage.clone();
                (store, Some(storage))
            }
            None => {
                tracing::warn!("storage.postgres not configured, using in-memory store");
                (create_memory_store(), None)
            }
        };

        let cache = create_cache_backend(&cfg.redis).await;
        let ctx = RepoContext::new(
            Arc::clone(&store),
            cache.clone(),
            cfg.locks.clone(),
            &cfg.repository,
        );
        tracing::info!(
            store = store.backend_name(),
            cache = cache.mode(),
            "Repositories ready"
        );

        Ok(Self {
            store,
            postgres,
            cache,
            repos: Repositories::new(ctx),
        })
    }

    pub async fn close(&self) {
        if let Some(pg) = &self.postgres {
            pg.close().await;
        }
        self.cache.close();
        tracing::debug!("Services closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_tables_and_sequences() {
        let tables = entity_tables();
        assert_eq!(tables.len(), 8);
        assert!(tables.contains(&"emergency_contact"));
        assert!(entity_sequences().contains(&"patient_id_seq"));
    }

    #[tokio::test]
    async fn test_init_without_postgres_uses_memory() {
        let services = Services::init(&AppConfig::default()).await.unwrap();
        assert_eq!(services.store.backend_name(), "in-memory");
        assert!(services.postgres.is_none());
        assert_eq!(services.cache.mode(), "local");
        services.close().await;
    }
}
