//! Id counter queries backed by native PostgreSQL sequences.

use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgPool;

use roydental_storage::StorageError;

use crate::error::sqlx_to_storage;

/// Increments the sequence and returns the new value.
pub async fn next_value(pool: &PgPool, sequence: &str) -> Result<i64, StorageError> {
    query_scalar("SELECT nextval($1::regclass)")
        .bind(sequence)
        .fetch_one(pool)
        .await
        .map_err(|e| sqlx_to_storage(e, "advance sequence"))
}

/// Rewinds the sequence by one step, but only while `issued` is still the
/// last value it handed out.
///
/// The check and the `setval` run in one statement, so a `nextval` that
/// already moved past `issued` makes this a no-op.
pub async fn rollback_value(
    pool: &PgPool,
    sequence: &str,
    issued: i64,
) -> Result<bool, StorageError> {
    let sql = format!(
        r#"SELECT setval($1::regclass, $2, false)
           FROM "{sequence}"
           WHERE last_value = $2 AND is_called"#
    );

    let rewound: Option<i64> = query_scalar(&sql)
        .bind(sequence)
        .bind(issued)
        .fetch_optional(pool)
        .await
        .map_err(|e| sqlx_to_storage(e, "rewind sequence"))?;

    Ok(rewound.is_some())
}
