//! PostgreSQL transaction implementation.
//!
//! Multi-record operations such as the aggregate cascade run inside one
//! native transaction, so either every row goes or none does.

use async_trait::async_trait;
use sqlx_postgres::PgTransaction;
use tokio::sync::Mutex;

use roydental_storage::{Filter, RowLock, StorageError, StoredRecord, Transaction};
use serde_json::Value;

use crate::queries;
use crate::schema::SchemaManager;

const COMPLETED: &str = "Transaction already completed (committed or rolled back)";

/// PostgreSQL transaction wrapper.
///
/// The transaction automatically rolls back on drop if not explicitly
/// committed.
pub struct PostgresTransaction {
    /// Wrapped in Mutex so the wrapper is `Sync`; wrapped in Option so
    /// commit/rollback can take ownership.
    tx: Mutex<Option<Box<PgTransaction<'static>>>>,
    schema_manager: SchemaManager,
}

impl PostgresTransaction {
    /// Wraps an open sqlx transaction.
    pub fn new(tx: PgTransaction<'static>, schema_manager: SchemaManager) -> Self {
        Self {
            tx: Mutex::new(Some(Box::new(tx))),
            schema_manager,
        }
    }

    fn open(&mut self) -> Result<&mut PgTransaction<'static>, StorageError> {
        self.tx
            .get_mut()
            .as_deref_mut()
            .ok_or_else(|| StorageError::transaction_error(COMPLETED))
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        if let Some(tx) = self.tx.get_mut().take() {
            tx.commit().await.map_err(|e| {
                StorageError::transaction_error(format!("Failed to commit transaction: {e}"))
            })?;
            tracing::debug!("Transaction committed successfully");
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        if let Some(tx) = self.tx.get_mut().take() {
            tx.rollback().await.map_err(|e| {
                StorageError::transaction_error(format!("Failed to rollback transaction: {e}"))
            })?;
            tracing::debug!("Transaction rolled back successfully");
        }
        Ok(())
    }

    async fn read_row(
        &mut self,
        table: &str,
        id: &str,
        lock: RowLock,
    ) -> Result<Option<StoredRecord>, StorageError> {
        self.schema_manager.ensure_table(table).await?;
        let tx = self.open()?;
        queries::crud::read_row(&mut **tx, table, id, lock).await
    }

    async fn insert(&mut self, table: &str, record: &StoredRecord) -> Result<(), StorageError> {
        self.schema_manager.ensure_table(table).await?;
        let tx = self.open()?;
        queries::crud::insert(&mut **tx, table, record).await
    }

    async fn upsert(
        &mut self,
        table: &str,
        record: &StoredRecord,
        changes: &Value,
    ) -> Result<(), StorageError> {
        self.schema_manager.ensure_table(table).await?;
        let tx = self.open()?;
        queries::crud::upsert(&mut **tx, table, record, changes).await
    }

    async fn find(
        &mut self,
        table: &str,
        filter: &Filter,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        self.schema_manager.ensure_table(table).await?;
        let tx = self.open()?;
        queries::crud::find(&mut **tx, table, filter).await
    }

    async fn delete(&mut self, table: &str, id: &str) -> Result<bool, StorageError> {
        self.schema_manager.ensure_table(table).await?;
        let tx = self.open()?;
        queries::crud::delete(&mut **tx, table, id).await
    }

    async fn delete_where(&mut self, table: &str, filter: &Filter) -> Result<u64, StorageError> {
        self.schema_manager.ensure_table(table).await?;
        let tx = self.open()?;
        queries::crud::delete_where(&mut **tx, table, filter).await
    }
}

impl Drop for PostgresTransaction {
    /// The inner sqlx transaction issues a ROLLBACK when dropped.
    fn drop(&mut self) {
        if self.tx.get_mut().is_some() {
            tracing::warn!(
                "PostgresTransaction dropped without explicit commit/rollback - will auto-rollback"
            );
        }
    }
}
