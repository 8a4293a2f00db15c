//! Storage traits for the backing-store abstraction layer.
//!
//! This module defines the core traits that all storage backends must implement.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;
use crate::types::{Filter, RowLock, StoredRecord};

/// The main storage trait that all backing stores must implement.
///
/// Records are grouped by table and addressed by a string primary key. The
/// store also owns one monotonically increasing counter per id namespace.
/// Implementations must be thread-safe (`Send + Sync`).
///
/// # Example
///
/// ```ignore
/// use roydental_storage::{RecordStore, StorageError, StoredRecord};
///
/// async fn get_doctor(store: &dyn RecordStore, id: &str) -> Result<StoredRecord, StorageError> {
///     store
///         .read("doctor", id)
///         .await?
///         .ok_or_else(|| StorageError::not_found("doctor", id))
/// }
/// ```
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ==================== CRUD Operations ====================

    /// Inserts a new record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if a record with the same ID exists.
    async fn insert(&self, table: &str, record: &StoredRecord) -> Result<(), StorageError>;

    /// Reads a record by ID.
    ///
    /// Returns `None` if the record does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing records.
    async fn read(&self, table: &str, id: &str) -> Result<Option<StoredRecord>, StorageError>;

    /// Returns every record of `table` matching `filter`, newest first.
    async fn find(&self, table: &str, filter: &Filter) -> Result<Vec<StoredRecord>, StorageError>;

    /// Inserts `record`, or if its ID already exists, merges the fields of
    /// `changes` into the stored data and leaves every other field untouched.
    ///
    /// Two racing upserts of the same ID never fail with a conflict; the
    /// later one wins field by field.
    async fn upsert(
        &self,
        table: &str,
        record: &StoredRecord,
        changes: &Value,
    ) -> Result<(), StorageError>;

    /// Deletes a record by ID. Returns `false` if there was nothing to delete.
    async fn delete(&self, table: &str, id: &str) -> Result<bool, StorageError>;

    // ==================== Sequences ====================

    /// Atomically increments the named counter and returns the new value.
    ///
    /// The first value of a fresh counter is 1.
    async fn next_value(&self, sequence: &str) -> Result<i64, StorageError>;

    /// Best-effort compensation for a value that was issued but never used.
    ///
    /// Rewinds the counter only if it still equals `issued`, so a value
    /// already handed to another caller is never issued again. Returns
    /// whether the counter was rewound.
    async fn rollback_value(&self, sequence: &str, issued: i64) -> Result<bool, StorageError>;

    // ==================== Transactions ====================

    /// Begins a new transaction.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` if a transaction cannot be started.
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError>;

    // ==================== Metadata ====================

    /// Returns the name of this storage backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// A transaction for performing atomic multi-record operations.
///
/// Operations within a transaction are invisible to other readers until the
/// transaction is committed. If the transaction is dropped or `rollback`
/// is called, all operations are undone.
///
/// # Example
///
/// ```ignore
/// async fn purge(store: &dyn RecordStore, patient_id: &str) -> Result<(), StorageError> {
///     let mut tx = store.begin_transaction().await?;
///     tx.delete_where("examination", &Filter::by_parent(patient_id)).await?;
///     tx.delete("patient", patient_id).await?;
///     tx.commit().await
/// }
/// ```
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Commits all operations in this transaction.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` if the commit fails.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Rolls back all operations in this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;

    /// Reads a record by primary key and holds `lock` on it until the
    /// transaction ends.
    ///
    /// A writer that checks a parent row with `RowLock::Share` and a
    /// deleter that takes `RowLock::Exclusive` first cannot interleave:
    /// whichever locks second waits and then sees the other's outcome.
    async fn read_row(
        &mut self,
        table: &str,
        id: &str,
        lock: RowLock,
    ) -> Result<Option<StoredRecord>, StorageError>;

    /// Inserts a record within this transaction.
    ///
    /// See `RecordStore::insert` for details.
    async fn insert(&mut self, table: &str, record: &StoredRecord) -> Result<(), StorageError>;

    /// Inserts or merges a record within this transaction.
    ///
    /// See `RecordStore::upsert` for details.
    async fn upsert(
        &mut self,
        table: &str,
        record: &StoredRecord,
        changes: &Value,
    ) -> Result<(), StorageError>;

    /// Finds records within this transaction, seeing its own uncommitted writes.
    async fn find(
        &mut self,
        table: &str,
        filter: &Filter,
    ) -> Result<Vec<StoredRecord>, StorageError>;

    /// Deletes a record within this transaction.
    async fn delete(&mut self, table: &str, id: &str) -> Result<bool, StorageError>;

    /// Deletes every record of `table` matching `filter`; returns the row count.
    async fn delete_where(&mut self, table: &str, filter: &Filter) -> Result<u64, StorageError>;
}
