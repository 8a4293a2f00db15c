//! Generic lock-guarded, cache-coherent repository.
//!
//! Every mutating call follows the same sequence: take the lock, validate,
//! persist, invalidate, release. A failure before persisting skips the
//! invalidation, since nothing changed; the lock is released either way.
//!
//! Reads never take locks. They go to the cache first and fall back to the
//! store under the read timeout, repopulating the cache on the way out.

use std::marker::PhantomData;

use roydental_core::{Entity, EntityDescriptor, now_utc, require_text};
use roydental_storage::{DynStore, Filter, RowLock, StoredRecord, Transaction};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::context::{RepoContext, missing_reference};
use crate::error::{IdRollback, RepoError, RepoResult};

/// Repository for one entity type, parameterized by its descriptor.
#[derive(Clone)]
pub struct Repository<E: Entity> {
    ctx: RepoContext,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Repository<E> {
    pub fn new(ctx: RepoContext) -> Self {
        Self {
            ctx,
            _entity: PhantomData,
        }
    }

    pub fn descriptor(&self) -> &'static EntityDescriptor {
        E::descriptor()
    }

    pub fn context(&self) -> &RepoContext {
        &self.ctx
    }

    fn store(&self) -> &DynStore {
        &self.ctx.store
    }

    /// Assign an id and persist a new record.
    ///
    /// Fails with `DuplicateEntity` if a record with the same natural key
    /// exists. If the insert fails after the id was allocated, the id is
    /// handed back on a best-effort basis.
    #[instrument(skip_all, fields(kind = E::descriptor().name))]
    pub async fn create(&self, mut entity: E) -> RepoResult<E> {
        let descriptor = E::descriptor();
        entity.normalize();
        let data = serde_json::to_value(&entity)?;
        let lock_key = descriptor.create_lock_key(&data);
        let ttl = self.ctx.locks.policy().record_ttl();

        self.ctx
            .with_lock(&lock_key, ttl, self.create_locked(entity, &data))
            .await
    }

    async fn create_locked(&self, mut entity: E, data: &Value) -> RepoResult<E> {
        let descriptor = E::descriptor();
        entity.validate()?;
        self.check_references(&entity).await?;

        if let Some(pairs) = descriptor.natural_key_values(data) {
            let key = render_natural_key(&pairs);
            let filter: Filter = pairs.into_iter().collect();
            let existing = self
                .ctx
                .bounded(descriptor.name, "uniqueness check", self.store().find(descriptor.table, &filter))
                .await?;
            if !existing.is_empty() {
                debug!(key = %key, "duplicate natural key");
                return Err(RepoError::duplicate(descriptor.name, key));
            }
        }

        let issued = self
            .ctx
            .ids
            .next(descriptor)
            .await
            .map_err(|e| RepoError::persistence(descriptor.name, e, IdRollback::NotAttempted))?;
        entity.set_id(issued.id.clone());
        entity.set_created_at(now_utc());

        if let Err(err) = self.insert_committed(&entity).await {
            let rollback = self.ctx.ids.rollback(descriptor, &issued).await;
            warn!(id = %issued.id, error = %err, rollback = %rollback, "insert failed");
            return Err(match err {
                RepoError::Storage(source) => RepoError::persistence(descriptor.name, source, rollback),
                other => other,
            });
        }

        self.ctx
            .cache
            .invalidate(descriptor, entity.id(), entity.parent_id())
            .await;
        info!(id = %issued.id, "created");
        Ok(entity)
    }

    async fn insert_committed(&self, entity: &E) -> RepoResult<()> {
        let descriptor = E::descriptor();
        let record = to_record(entity)?;
        let mut tx = self.store().begin_transaction().await?;
        let outcome: RepoResult<()> = async {
            self.confirm_parent(tx.as_mut(), record.parent_id.as_deref()).await?;
            tx.insert(descriptor.table, &record).await?;
            Ok(())
        }
        .await;
        finish(tx, outcome).await
    }

    /// Re-check the parent row inside `tx` and hold it against deletion
    /// until `tx` ends. The aggregate cascade locks the same row
    /// exclusively, so a dependent write and a cascade never interleave.
    async fn confirm_parent(&self, tx: &mut dyn Transaction, parent_id: Option<&str>) -> RepoResult<()> {
        let descriptor = E::descriptor();
        let Some(link) = descriptor.parent else {
            return Ok(());
        };
        let parent = parent_id.unwrap_or_default();
        if tx.read_row(link.entity.table, parent, RowLock::Share).await?.is_none() {
            return Err(missing_reference(descriptor.name, link.entity, parent));
        }
        Ok(())
    }

    /// Read one record.
    ///
    /// For parent-scoped types the parent id selects the cache key; a
    /// record that belongs to a different parent reads as `NotFound`.
    #[instrument(skip(self), fields(kind = E::descriptor().name))]
    pub async fn get_by_id(&self, id: &str, parent_id: Option<&str>) -> RepoResult<E> {
        let descriptor = E::descriptor();
        let key = descriptor.cache_key(parent_id, id);

        if let Some(key) = &key
            && let Some(hit) = self.ctx.cache.get::<E>(key).await
        {
            return self.check_parent(hit, parent_id);
        }

        let record = self
            .ctx
            .bounded(descriptor.name, "read", self.store().read(descriptor.table, id))
            .await?
            .ok_or_else(|| RepoError::not_found(descriptor.name, id))?;
        let entity = self.check_parent(from_record::<E>(record)?, parent_id)?;

        if let Some(key) = key.or_else(|| descriptor.cache_key(entity.parent_id(), entity.id())) {
            self.ctx.cache.put(descriptor, &key, &entity).await;
        }
        Ok(entity)
    }

    /// Every record of this type, newest first.
    #[instrument(skip(self), fields(kind = E::descriptor().name))]
    pub async fn get_all(&self) -> RepoResult<Vec<E>> {
        let descriptor = E::descriptor();
        if let Some(hit) = self.ctx.cache.get::<Vec<E>>(descriptor.collection_key).await {
            return Ok(hit);
        }

        let rows = self
            .ctx
            .bounded(descriptor.name, "read all", self.store().find(descriptor.table, &Filter::new()))
            .await?;
        let entities = rows
            .into_iter()
            .map(from_record::<E>)
            .collect::<RepoResult<Vec<_>>>()?;

        self.ctx
            .cache
            .put(descriptor, descriptor.collection_key, &entities)
            .await;
        Ok(entities)
    }

    /// Records belonging to one parent, read straight from the store.
    pub async fn find_by_parent(&self, parent_id: &str) -> RepoResult<Vec<E>> {
        let descriptor = E::descriptor();
        if descriptor.parent.is_none() {
            return Err(roydental_core::CoreError::validation(descriptor.name, "type has no parent").into());
        }
        let rows = self
            .ctx
            .bounded(
                descriptor.name,
                "find by parent",
                self.store().find(descriptor.table, &Filter::by_parent(parent_id)),
            )
            .await?;
        rows.into_iter().map(from_record::<E>).collect()
    }

    /// Write the mutable fields of `entity`, inserting it if absent.
    #[instrument(skip_all, fields(kind = E::descriptor().name, id = %entity.id()))]
    pub async fn update(&self, mut entity: E) -> RepoResult<()> {
        let descriptor = E::descriptor();
        require_text(descriptor.name, descriptor.id_field, entity.id())?;
        entity.normalize();
        let lock_key = descriptor.record_lock_key(entity.id());
        let ttl = self.ctx.locks.policy().record_ttl();

        self.ctx
            .with_lock(&lock_key, ttl, self.update_locked(entity))
            .await
    }

    async fn update_locked(&self, entity: E) -> RepoResult<()> {
        let descriptor = E::descriptor();
        entity.validate()?;
        self.check_references(&entity).await?;

        // The stored parent wins; the parent link is not a mutable field
        let existing = self
            .ctx
            .bounded(descriptor.name, "read", self.store().read(descriptor.table, entity.id()))
            .await?;
        let parent = existing
            .and_then(|row| row.parent_id)
            .or_else(|| entity.parent_id().map(str::to_owned));

        let mut record = to_record(&entity)?;
        record.parent_id = parent.clone();
        let changes = descriptor.mutable_projection(&record.data);
        let mut tx = self.store().begin_transaction().await?;
        let outcome: RepoResult<()> = async {
            self.confirm_parent(tx.as_mut(), record.parent_id.as_deref()).await?;
            tx.upsert(descriptor.table, &record, &changes).await?;
            Ok(())
        }
        .await;
        finish(tx, outcome).await.map_err(|e| match e {
            RepoError::Storage(source) => {
                RepoError::persistence(descriptor.name, source, IdRollback::NotAttempted)
            }
            other => other,
        })?;

        self.ctx
            .cache
            .invalidate(descriptor, entity.id(), parent.as_deref())
            .await;
        info!("updated");
        Ok(())
    }

    /// Delete one record. Deleting an absent record fails with `NotFound`
    /// and leaves the cache alone.
    #[instrument(skip(self), fields(kind = E::descriptor().name))]
    pub async fn delete(&self, id: &str, parent_id: Option<&str>) -> RepoResult<()> {
        let descriptor = E::descriptor();
        let lock_key = descriptor.record_lock_key(id);
        let ttl = self.ctx.locks.policy().record_ttl();

        self.ctx
            .with_lock(&lock_key, ttl, self.delete_locked(id, parent_id))
            .await
    }

    async fn delete_locked(&self, id: &str, parent_id: Option<&str>) -> RepoResult<()> {
        let descriptor = E::descriptor();
        let existing = self
            .ctx
            .bounded(descriptor.name, "read", self.store().read(descriptor.table, id))
            .await?
            .ok_or_else(|| RepoError::not_found(descriptor.name, id))?;

        if descriptor.parent.is_some()
            && let Some(expected) = parent_id
            && existing.parent_id.as_deref() != Some(expected)
        {
            return Err(RepoError::not_found(descriptor.name, id));
        }

        let removed = self
            .store()
            .delete(descriptor.table, id)
            .await
            .map_err(|e| RepoError::persistence(descriptor.name, e, IdRollback::NotAttempted))?;
        if !removed {
            return Err(RepoError::not_found(descriptor.name, id));
        }

        self.ctx
            .cache
            .invalidate(descriptor, id, existing.parent_id.as_deref())
            .await;
        info!(id = %id, "deleted");
        Ok(())
    }

    /// Parent and referenced records must exist.
    async fn check_references(&self, entity: &E) -> RepoResult<()> {
        let descriptor = E::descriptor();
        if let Some(link) = descriptor.parent {
            let parent = entity.parent_id().unwrap_or_default();
            require_text(descriptor.name, link.field, parent)?;
            self.ctx
                .require_exists(descriptor.name, link.entity, parent)
                .await?;
        }
        for (target, id) in entity.references() {
            self.ctx.require_exists(descriptor.name, target, &id).await?;
        }
        Ok(())
    }

    fn check_parent(&self, entity: E, parent_id: Option<&str>) -> RepoResult<E> {
        let descriptor = E::descriptor();
        match parent_id {
            Some(expected) if descriptor.parent.is_some() && entity.parent_id() != Some(expected) => {
                Err(RepoError::not_found(descriptor.name, entity.id()))
            }
            _ => Ok(entity),
        }
    }
}

/// Commit `tx` if `outcome` succeeded, otherwise roll it back.
pub(crate) async fn finish(tx: Box<dyn Transaction>, outcome: RepoResult<()>) -> RepoResult<()> {
    match outcome {
        Ok(()) => Ok(tx.commit().await?),
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                warn!(error = %rb, "transaction rollback failed");
            }
            Err(e)
        }
    }
}

pub(crate) fn to_record<E: Entity>(entity: &E) -> RepoResult<StoredRecord> {
    let data = serde_json::to_value(entity)?;
    Ok(StoredRecord::new(
        entity.id(),
        entity.parent_id().map(str::to_owned),
        data,
    ))
}

pub(crate) fn from_record<E: Entity>(record: StoredRecord) -> RepoResult<E> {
    Ok(serde_json::from_value(record.data)?)
}

fn render_natural_key(pairs: &[(&'static str, Value)]) -> String {
    pairs
        .iter()
        .map(|(_, value)| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("_")
}
