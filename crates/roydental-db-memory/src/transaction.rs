//! Snapshot transactions for the in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use roydental_storage::{Filter, RowLock, StorageError, StoredRecord, Transaction};
use serde_json::Value;

use crate::storage::{Row, Shared, Tables, select, upsert_row};

/// A transaction working on a private copy of every table.
///
/// The copy replaces the committed tables on `commit`; dropping the
/// transaction discards it. The store's writer lock is held for the whole
/// lifetime, so no other write can interleave.
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    working: Tables,
    _writer: OwnedMutexGuard<()>,
}

impl MemoryTransaction {
    pub(crate) fn new(shared: Arc<Shared>, working: Tables, writer: OwnedMutexGuard<()>) -> Self {
        Self {
            shared,
            working,
            _writer: writer,
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let MemoryTransaction {
            shared,
            working,
            _writer,
        } = *self;
        *shared.tables.write().await = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }

    // The writer lock already excludes every other transaction
    async fn read_row(
        &mut self,
        table: &str,
        id: &str,
        _lock: RowLock,
    ) -> Result<Option<StoredRecord>, StorageError> {
        Ok(self
            .working
            .get(table)
            .and_then(|rows| rows.get(id))
            .map(|row| row.record.clone()))
    }

    async fn insert(&mut self, table: &str, record: &StoredRecord) -> Result<(), StorageError> {
        let rows = self.working.entry(table.to_string()).or_default();
        if rows.contains_key(&record.id) {
            return Err(StorageError::already_exists(table, &record.id));
        }
        rows.insert(
            record.id.clone(),
            Row {
                order: self.shared.next_order(),
                record: record.clone(),
            },
        );
        Ok(())
    }

    async fn upsert(
        &mut self,
        table: &str,
        record: &StoredRecord,
        changes: &Value,
    ) -> Result<(), StorageError> {
        upsert_row(&self.shared, &mut self.working, table, record, changes);
        Ok(())
    }

    async fn find(
        &mut self,
        table: &str,
        filter: &Filter,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        Ok(select(self.working.get(table), filter))
    }

    async fn delete(&mut self, table: &str, id: &str) -> Result<bool, StorageError> {
        Ok(self
            .working
            .get_mut(table)
            .and_then(|rows| rows.remove(id))
            .is_some())
    }

    async fn delete_where(&mut self, table: &str, filter: &Filter) -> Result<u64, StorageError> {
        let Some(rows) = self.working.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|_, row| !filter.matches(&row.record));
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use roydental_storage::RecordStore;
    use serde_json::json;

    use super::*;
    use crate::InMemoryStorage;

    fn contact(id: &str, patient: &str) -> StoredRecord {
        StoredRecord::new(
            id,
            Some(patient.to_string()),
            json!({"id": id, "patient_id": patient, "phone": format!("07{id}")}),
        )
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let storage = InMemoryStorage::new();
        let mut tx = storage.begin_transaction().await.unwrap();
        tx.insert("emergency_contact", &contact("1", "DP-000001"))
            .await
            .unwrap();

        // Uncommitted rows are visible inside the transaction only
        assert_eq!(
            tx.find("emergency_contact", &Filter::new()).await.unwrap().len(),
            1
        );
        tx.commit().await.unwrap();
        assert_eq!(storage.count("emergency_contact").await, 1);
    }

    #[tokio::test]
    async fn test_rollback_and_drop_discard_writes() {
        let storage = InMemoryStorage::new();
        storage
            .insert("emergency_contact", &contact("1", "DP-000001"))
            .await
            .unwrap();

        let mut tx = storage.begin_transaction().await.unwrap();
        tx.delete("emergency_contact", "1").await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(storage.count("emergency_contact").await, 1);

        {
            let mut tx = storage.begin_transaction().await.unwrap();
            tx.delete("emergency_contact", "1").await.unwrap();
        }
        assert_eq!(storage.count("emergency_contact").await, 1);
    }

    #[tokio::test]
    async fn test_delete_where() {
        let storage = InMemoryStorage::new();
        for (id, patient) in [("1", "DP-000001"), ("2", "DP-000001"), ("3", "DP-000002")] {
            storage
                .insert("emergency_contact", &contact(id, patient))
                .await
                .unwrap();
        }

        let mut tx = storage.begin_transaction().await.unwrap();
        let removed = tx
            .delete_where(
                "emergency_contact",
                &Filter::by_parent("DP-000001"),
            )
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(tx.delete_where("examination", &Filter::new()).await.unwrap(), 0);
        tx.commit().await.unwrap();

        let left = storage
            .find("emergency_contact", &Filter::new())
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "3");
    }

    #[tokio::test]
    async fn test_read_row_and_upsert_see_working_copy() {
        let storage = InMemoryStorage::new();
        let mut tx = storage.begin_transaction().await.unwrap();
        assert!(tx.read_row("patient", "DP-000001", RowLock::Share).await.unwrap().is_none());

        let patient = StoredRecord::new("DP-000001", None, json!({"id": "DP-000001", "phone": "0700"}));
        tx.upsert("patient", &patient, &json!({"phone": "0700"})).await.unwrap();
        tx.upsert("patient", &patient, &json!({"phone": "0711"})).await.unwrap();

        let row = tx
            .read_row("patient", "DP-000001", RowLock::Exclusive)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.data["phone"], "0711");
        assert_eq!(storage.count("patient").await, 0);

        tx.commit().await.unwrap();
        assert_eq!(storage.count("patient").await, 1);
    }
}
