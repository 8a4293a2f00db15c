//! Sequential id allocation on top of the store's per-namespace counters.

use roydental_core::EntityDescriptor;
use roydental_storage::{DynStore, StorageError};
use tracing::{debug, warn};

use crate::error::IdRollback;

/// An id handed out by [`IdAllocator::next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedId {
    /// Raw counter value.
    pub value: i64,
    /// Formatted id, e.g. `DP-000001`.
    pub id: String,
}

/// Issues ids from the durable counters of the backing store.
#[derive(Clone)]
pub struct IdAllocator {
    store: DynStore,
}

impl IdAllocator {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    /// Increment the descriptor's counter and format the new value.
    pub async fn next(&self, descriptor: &EntityDescriptor) -> Result<IssuedId, StorageError> {
        let sequence = descriptor.id_scheme.sequence();
        let value = self.store.next_value(sequence).await?;
        let id = descriptor.id_scheme.format(value);
        debug!(sequence, value, id = %id, "allocated id");
        Ok(IssuedId { value, id })
    }

    /// Give back an id whose insert failed.
    ///
    /// Best effort: the counter is only rewound while it still equals the
    /// issued value. Never fails; the outcome is reported instead.
    pub async fn rollback(&self, descriptor: &EntityDescriptor, issued: &IssuedId) -> IdRollback {
        let sequence = descriptor.id_scheme.sequence();
        match self.store.rollback_value(sequence, issued.value).await {
            Ok(true) => {
                debug!(sequence, id = %issued.id, "id rolled back");
                IdRollback::Rewound
            }
            Ok(false) => {
                debug!(sequence, id = %issued.id, "counter moved on, leaving id gap");
                IdRollback::Gap
            }
            Err(e) => {
                warn!(sequence, id = %issued.id, error = %e, "id rollback failed");
                IdRollback::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roydental_core::{EMERGENCY_CONTACT, PATIENT};
    use roydental_db_memory::create_memory_store;

    #[tokio::test]
    async fn test_next_formats_per_scheme() {
        let allocator = IdAllocator::new(create_memory_store());

        let first = allocator.next(&PATIENT).await.unwrap();
        assert_eq!(first, IssuedId { value: 1, id: "DP-000001".into() });
        assert_eq!(allocator.next(&PATIENT).await.unwrap().id, "DP-000002");

        // Serial ids are unpadded and use their own counter
        assert_eq!(allocator.next(&EMERGENCY_CONTACT).await.unwrap().id, "1");
    }

    #[tokio::test]
    async fn test_rollback_only_rewinds_latest() {
        let allocator = IdAllocator::new(create_memory_store());

        let first = allocator.next(&PATIENT).await.unwrap();
        let second = allocator.next(&PATIENT).await.unwrap();

        // A later value was already issued, so the first stays a gap
        assert_eq!(allocator.rollback(&PATIENT, &first).await, IdRollback::Gap);
        assert_eq!(allocator.rollback(&PATIENT, &second).await, IdRollback::Rewound);
        assert_eq!(allocator.next(&PATIENT).await.unwrap().id, "DP-000002");
    }
}
