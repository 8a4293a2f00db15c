//! Schema management for the PostgreSQL storage backend.
//!
//! Every record table shares one layout: the primary key and parent id are
//! lifted into columns, the full record lives in a JSONB column, and a
//! generated ordinal gives a stable newest-first order. Id counters are
//! native PostgreSQL sequences.

use std::sync::{Arc, LazyLock};

use dashmap::DashSet;
use regex::Regex;
use sqlx_postgres::PgPool;
use tracing::{debug, info, instrument};

use crate::error::{PostgresError, Result};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("Invalid identifier regex"));

/// Rejects anything that is not a plain lowercase SQL identifier.
///
/// Table and sequence names cannot be bound as parameters, so they are
/// checked before being formatted into SQL.
pub fn checked_identifier(name: &str) -> Result<&str> {
    if IDENTIFIER.is_match(name) {
        Ok(name)
    } else {
        Err(PostgresError::schema(format!("invalid identifier: {name:?}")))
    }
}

/// Creates tables and sequences on first use.
///
/// Caches what has been verified so the hot path never touches the
/// catalogue twice.
#[derive(Debug, Clone)]
pub struct SchemaManager {
    pool: PgPool,
    created_tables: Arc<DashSet<String>>,
    created_sequences: Arc<DashSet<String>>,
}

impl SchemaManager {
    /// Creates a new `SchemaManager` with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            created_tables: Arc::new(DashSet::new()),
            created_sequences: Arc::new(DashSet::new()),
        }
    }

    /// Ensures the record table exists.
    ///
    /// Idempotent; concurrent callers may both issue the DDL, which is
    /// harmless thanks to `IF NOT EXISTS`.
    #[instrument(skip(self))]
    pub async fn ensure_table(&self, table: &str) -> Result<()> {
        let table = checked_identifier(table)?;
        if self.created_tables.contains(table) {
            return Ok(());
        }

        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                resource JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                ordinal BIGINT GENERATED ALWAYS AS IDENTITY
            )
            "#
        );
        sqlx_core::query::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        let index = format!(
            r#"CREATE INDEX IF NOT EXISTS "{table}_parent_idx" ON "{table}" (parent_id)"#
        );
        sqlx_core::query::query(&index)
            .execute(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        debug!(table, "table ready");
        self.created_tables.insert(table.to_string());
        Ok(())
    }

    /// Ensures the id sequence exists. A fresh sequence yields 1 first.
    #[instrument(skip(self))]
    pub async fn ensure_sequence(&self, sequence: &str) -> Result<()> {
        let sequence = checked_identifier(sequence)?;
        if self.created_sequences.contains(sequence) {
            return Ok(());
        }

        let sql = format!(r#"CREATE SEQUENCE IF NOT EXISTS "{sequence}" START WITH 1"#);
        sqlx_core::query::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        debug!(sequence, "sequence ready");
        self.created_sequences.insert(sequence.to_string());
        Ok(())
    }

    /// Creates every listed table and sequence up front.
    #[instrument(skip_all)]
    pub async fn bootstrap(&self, tables: &[&str], sequences: &[&str]) -> Result<()> {
        for table in tables {
            self.ensure_table(table).await?;
        }
        for sequence in sequences {
            self.ensure_sequence(sequence).await?;
        }
        info!(
            tables = tables.len(),
            sequences = sequences.len(),
            "schema bootstrap complete"
        );
        Ok(())
    }
}
