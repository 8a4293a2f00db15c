use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use roydental_storage::{Filter, RecordStore, StorageError, StoredRecord, Transaction};

use crate::transaction::MemoryTransaction;

/// A stored row plus its insertion order, used to list newest first.
#[derive(Debug, Clone)]
pub(crate) struct Row {
    pub(crate) order: u64,
    pub(crate) record: StoredRecord,
}

pub(crate) type Table = HashMap<String, Row>;
pub(crate) type Tables = HashMap<String, Table>;

#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) tables: RwLock<Tables>,
    /// Held by every writer; a transaction keeps it until commit or rollback.
    pub(crate) writer: Arc<Mutex<()>>,
    pub(crate) sequences: DashMap<String, i64>,
    pub(crate) row_counter: AtomicU64,
}

impl Shared {
    pub(crate) fn next_order(&self) -> u64 {
        self.row_counter.fetch_add(1, Ordering::SeqCst)
    }
}

/// In-memory record store.
///
/// This storage implementation provides:
/// - Per-table hash maps behind a single `RwLock`
/// - Serialized writers, so a transaction sees a stable snapshot
/// - Lock-free sequence counters via `DashMap`
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    pub(crate) shared: Arc<Shared>,
}

impl InMemoryStorage {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently committed to `table`.
    pub async fn count(&self, table: &str) -> usize {
        self.shared
            .tables
            .read()
            .await
            .get(table)
            .map_or(0, HashMap::len)
    }

    /// Current value of a sequence counter, 0 if it was never used.
    pub fn current_value(&self, sequence: &str) -> i64 {
        self.shared.sequences.get(sequence).map_or(0, |v| *v)
    }
}

/// Matching rows of one table, newest first.
pub(crate) fn select(table: Option<&Table>, filter: &Filter) -> Vec<StoredRecord> {
    let Some(table) = table else {
        return Vec::new();
    };
    let mut rows: Vec<&Row> = table
        .values()
        .filter(|row| filter.matches(&row.record))
        .collect();
    rows.sort_by(|a, b| b.order.cmp(&a.order));
    rows.into_iter().map(|row| row.record.clone()).collect()
}

/// Overlay the fields of `changes` onto `data`.
pub(crate) fn merge_fields(data: &mut Value, changes: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (data, changes) {
        for (field, value) in patch {
            target.insert(field.clone(), value.clone());
        }
    }
}

/// Merge `changes` into an existing row, or insert `record` when absent.
pub(crate) fn upsert_row(
    shared: &Shared,
    tables: &mut Tables,
    table: &str,
    record: &StoredRecord,
    changes: &Value,
) {
    let rows = tables.entry(table.to_string()).or_default();
    match rows.get_mut(&record.id) {
        Some(row) => merge_fields(&mut row.record.data, changes),
        None => {
            rows.insert(
                record.id.clone(),
                Row {
                    order: shared.next_order(),
                    record: record.clone(),
                },
            );
        }
    }
}

#[async_trait]
impl RecordStore for InMemoryStorage {
    async fn insert(&self, table: &str, record: &StoredRecord) -> Result<(), StorageError> {
        let _writer = self.shared.writer.lock().await;
        let mut tables = self.shared.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();
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

    async fn read(&self, table: &str, id: &str) -> Result<Option<StoredRecord>, StorageError> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .get(table)
            .and_then(|rows| rows.get(id))
            .map(|row| row.record.clone()))
    }

    async fn find(&self, table: &str, filter: &Filter) -> Result<Vec<StoredRecord>, StorageError> {
        let tables = self.shared.tables.read().await;
        Ok(select(tables.get(table), filter))
    }

    async fn upsert(
        &self,
        table: &str,
        record: &StoredRecord,
        changes: &Value,
    ) -> Result<(), StorageError> {
        let _writer = self.shared.writer.lock().await;
        let mut tables = self.shared.tables.write().await;
        upsert_row(&self.shared, &mut tables, table, record, changes);
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool, StorageError> {
        let _writer = self.shared.writer.lock().await;
        let mut tables = self.shared.tables.write().await;
        Ok(tables
            .get_mut(table)
            .and_then(|rows| rows.remove(id))
            .is_some())
    }

    async fn next_value(&self, sequence: &str) -> Result<i64, StorageError> {
        let mut counter = self.shared.sequences.entry(sequence.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn rollback_value(&self, sequence: &str, issued: i64) -> Result<bool, StorageError> {
        let Some(mut counter) = self.shared.sequences.get_mut(sequence) else {
            return Ok(false);
        };
        if *counter != issued {
            tracing::debug!(
                sequence,
                issued,
                current = *counter,
                "sequence moved on, leaving gap"
            );
            return Ok(false);
        }
        *counter -= 1;
        Ok(true)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError> {
        let writer = Arc::clone(&self.shared.writer).lock_owned().await;
        let snapshot = self.shared.tables.read().await.clone();
        Ok(Box::new(MemoryTransaction::new(
            Arc::clone(&self.shared),
            snapshot,
            writer,
        )))
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doctor(id: &str, first: &str) -> StoredRecord {
        StoredRecord::new(id, None, json!({"id": id, "first_name": first, "last_name": "Osei"}))
    }

    #[tokio::test]
    async fn test_insert_read_delete() {
        let storage = InMemoryStorage::new();
        storage.insert("doctor", &doctor("DR-000001", "Ama")).await.unwrap();

        let read = storage.read("doctor", "DR-000001").await.unwrap().unwrap();
        assert_eq!(read.data["first_name"], "Ama");

        assert!(storage.delete("doctor", "DR-000001").await.unwrap());
        assert!(!storage.delete("doctor", "DR-000001").await.unwrap());
        assert!(storage.read("doctor", "DR-000001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_conflict() {
        let storage = InMemoryStorage::new();
        storage.insert("doctor", &doctor("DR-000001", "Ama")).await.unwrap();
        let err = storage
            .insert("doctor", &doctor("DR-000001", "Kojo"))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_find_newest_first() {
        let storage = InMemoryStorage::new();
        for (i, name) in ["Ama", "Kojo", "Esi"].iter().enumerate() {
            storage
                .insert("doctor", &doctor(&format!("DR-00000{}", i + 1), name))
                .await
                .unwrap();
        }

        let all = storage.find("doctor", &Filter::new()).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["DR-000003", "DR-000002", "DR-000001"]);

        let kojo = storage
            .find("doctor", &Filter::new().eq("first_name", "Kojo"))
            .await
            .unwrap();
        assert_eq!(kojo.len(), 1);
        assert!(storage.find("nurse", &Filter::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_merges_only_changes() {
        let storage = InMemoryStorage::new();
        storage.insert("doctor", &doctor("DR-000001", "Ama")).await.unwrap();

        let replacement = doctor("DR-000001", "Yaw");
        storage
            .upsert("doctor", &replacement, &json!({"last_name": "Boateng"}))
            .await
            .unwrap();

        let read = storage.read("doctor", "DR-000001").await.unwrap().unwrap();
        assert_eq!(read.data["first_name"], "Ama");
        assert_eq!(read.data["last_name"], "Boateng");

        // Absent rows are inserted whole
        storage
            .upsert("doctor", &doctor("DR-000009", "Yaw"), &json!({}))
            .await
            .unwrap();
        assert_eq!(storage.count("doctor").await, 2);
    }

    #[tokio::test]
    async fn test_sequences() {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.next_value("patient_id_seq").await.unwrap(), 1);
        assert_eq!(storage.next_value("patient_id_seq").await.unwrap(), 2);
        assert_eq!(storage.next_value("doctor_id_seq").await.unwrap(), 1);

        // Rewinds only while the issued value is still the latest
        assert!(storage.rollback_value("patient_id_seq", 2).await.unwrap());
        assert_eq!(storage.current_value("patient_id_seq"), 1);
        assert_eq!(storage.next_value("patient_id_seq").await.unwrap(), 2);
        assert_eq!(storage.next_value("patient_id_seq").await.unwrap(), 3);
        assert!(!storage.rollback_value("patient_id_seq", 2).await.unwrap());
        assert_eq!(storage.current_value("patient_id_seq"), 3);
        assert!(!storage.rollback_value("unknown_seq", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_backend_name() {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.backend_name(), "in-memory");
    }
}
