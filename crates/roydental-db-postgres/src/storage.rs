//! PostgreSQL implementation of the RecordStore trait.

use async_trait::async_trait;
use serde_json::Value;
use sqlx_postgres::PgPool;

use roydental_storage::{Filter, RecordStore, StorageError, StoredRecord, Transaction};

use crate::config::PostgresConfig;
use crate::pool;
use crate::queries;
use crate::schema::SchemaManager;
use crate::transaction::PostgresTransaction;

/// PostgreSQL storage backend for clinic records.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
    schema_manager: SchemaManager,
}

impl PostgresStorage {
    /// Creates a new `PostgresStorage` with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection pool cannot be created.
    pub async fn new(config: PostgresConfig) -> Result<Self, StorageError> {
        let pool = pool::create_pool(&config).await?;
        Ok(Self::from_pool(pool))
    }

    /// Creates a new `PostgresStorage` from an existing connection pool.
    ///
    /// This allows sharing a connection pool between multiple components.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        let schema_manager = SchemaManager::new(pool.clone());
        Self {
            pool,
            schema_manager,
        }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Returns the schema manager.
    #[must_use]
    pub fn schema(&self) -> &SchemaManager {
        &self.schema_manager
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for PostgresStorage {
    async fn insert(&self, table: &str, record: &StoredRecord) -> Result<(), StorageError> {
        self.schema_manager.ensure_table(table).await?;
        queries::crud::insert(&self.pool, table, record).await
    }

    async fn read(&self, table: &str, id: &str) -> Result<Option<StoredRecord>, StorageError> {
        self.schema_manager.ensure_table(table).await?;
        queries::crud::read(&self.pool, table, id).await
    }

    async fn find(&self, table: &str, filter: &Filter) -> Result<Vec<StoredRecord>, StorageError> {
        self.schema_manager.ensure_table(table).await?;
        queries::crud::find(&self.pool, table, filter).await
    }

    async fn upsert(
        &self,
        table: &str,
        record: &StoredRecord,
        changes: &Value,
    ) -> Result<(), StorageError> {
        self.schema_manager.ensure_table(table).await?;
        queries::crud::upsert(&self.pool, table, record, changes).await
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool, StorageError> {
        self.schema_manager.ensure_table(table).await?;
        queries::crud::delete(&self.pool, table, id).await
    }

    async fn next_value(&self, sequence: &str) -> Result<i64, StorageError> {
        self.schema_manager.ensure_sequence(sequence).await?;
        queries::sequence::next_value(&self.pool, sequence).await
    }

    async fn rollback_value(&self, sequence: &str, issued: i64) -> Result<bool, StorageError> {
        self.schema_manager.ensure_sequence(sequence).await?;
        queries::sequence::rollback_value(&self.pool, sequence, issued).await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError> {
        let tx = self.pool.begin().await.map_err(|e| {
            StorageError::transaction_error(format!("Failed to begin transaction: {e}"))
        })?;
        Ok(Box::new(PostgresTransaction::new(
            tx,
            self.schema_manager.clone(),
        )))
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
