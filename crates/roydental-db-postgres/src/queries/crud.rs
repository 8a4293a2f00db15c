//! CRUD query implementations over the shared record-table layout.

use serde_json::Value;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgExecutor;

use roydental_storage::{Filter, RowLock, StorageError, StoredRecord};

use crate::error::{is_unique_violation, sqlx_to_storage};

type RecordRow = (String, Option<String>, Value);

fn to_record((id, parent_id, data): RecordRow) -> StoredRecord {
    StoredRecord::new(id, parent_id, data)
}

/// Renders the WHERE clause for a filter, numbering placeholders from
/// `first`. The parent link binds first, against the indexed `parent_id`
/// column; each data condition then binds a field name and a JSON value.
fn where_clause(filter: &Filter, first: usize) -> String {
    if filter.is_empty() {
        return String::new();
    }
    let mut next = first;
    let mut clauses = Vec::with_capacity(filter.conditions().len() + 1);
    if filter.parent_id().is_some() {
        clauses.push(format!("parent_id = ${next}"));
        next += 1;
    }
    for _ in filter.conditions() {
        clauses.push(format!("resource -> ${next}::text = ${}::jsonb", next + 1));
        next += 2;
    }
    format!(" WHERE {}", clauses.join(" AND "))
}

fn lock_clause(lock: RowLock) -> &'static str {
    match lock {
        RowLock::Share => "FOR KEY SHARE",
        RowLock::Exclusive => "FOR UPDATE",
    }
}

/// Inserts a new record; a duplicate primary key maps to `AlreadyExists`.
pub async fn insert<'c, E>(
    executor: E,
    table: &str,
    record: &StoredRecord,
) -> Result<(), StorageError>
where
    E: PgExecutor<'c>,
{
    let sql = format!(r#"INSERT INTO "{table}" (id, parent_id, resource) VALUES ($1, $2, $3)"#);

    query(&sql)
        .bind(&record.id)
        .bind(&record.parent_id)
        .bind(&record.data)
        .execute(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StorageError::already_exists(table, &record.id)
            } else {
                sqlx_to_storage(e, "insert record")
            }
        })?;

    Ok(())
}

/// Reads a record by primary key.
pub async fn read<'c, E>(
    executor: E,
    table: &str,
    id: &str,
) -> Result<Option<StoredRecord>, StorageError>
where
    E: PgExecutor<'c>,
{
    let sql = format!(r#"SELECT id, parent_id, resource FROM "{table}" WHERE id = $1"#);

    let row: Option<RecordRow> = query_as(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(|e| sqlx_to_storage(e, "read record"))?;

    Ok(row.map(to_record))
}

/// Reads a record by primary key inside a transaction, locking the row.
pub async fn read_row<'c, E>(
    executor: E,
    table: &str,
    id: &str,
    lock: RowLock,
) -> Result<Option<StoredRecord>, StorageError>
where
    E: PgExecutor<'c>,
{
    let sql = format!(
        r#"SELECT id, parent_id, resource FROM "{table}" WHERE id = $1 {}"#,
        lock_clause(lock)
    );

    let row: Option<RecordRow> = query_as(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(|e| sqlx_to_storage(e, "lock record"))?;

    Ok(row.map(to_record))
}

/// Returns matching records, newest first.
pub async fn find<'c, E>(
    executor: E,
    table: &str,
    filter: &Filter,
) -> Result<Vec<StoredRecord>, StorageError>
where
    E: PgExecutor<'c>,
{
    let sql = format!(
        r#"SELECT id, parent_id, resource FROM "{table}"{} ORDER BY ordinal DESC"#,
        where_clause(filter, 1)
    );

    let mut q = query_as::<_, RecordRow>(&sql);
    if let Some(parent) = filter.parent_id() {
        q = q.bind(parent);
    }
    for condition in filter.conditions() {
        q = q.bind(condition.field.as_str()).bind(&condition.value);
    }

    let rows = q
        .fetch_all(executor)
        .await
        .map_err(|e| sqlx_to_storage(e, "find records"))?;

    Ok(rows.into_iter().map(to_record).collect())
}

/// Inserts the record, or merges `changes` into the stored JSONB when the
/// primary key already exists.
pub async fn upsert<'c, E>(
    executor: E,
    table: &str,
    record: &StoredRecord,
    changes: &Value,
) -> Result<(), StorageError>
where
    E: PgExecutor<'c>,
{
    let sql = format!(
        r#"INSERT INTO "{table}" (id, parent_id, resource) VALUES ($1, $2, $3)
           ON CONFLICT (id) DO UPDATE SET resource = "{table}".resource || $4::jsonb"#
    );

    query(&sql)
        .bind(&record.id)
        .bind(&record.parent_id)
        .bind(&record.data)
        .bind(changes)
        .execute(executor)
        .await
        .map_err(|e| sqlx_to_storage(e, "upsert record"))?;

    Ok(())
}

/// Deletes a record by primary key, returning whether a row was removed.
pub async fn delete<'c, E>(executor: E, table: &str, id: &str) -> Result<bool, StorageError>
where
    E: PgExecutor<'c>,
{
    let sql = format!(r#"DELETE FROM "{table}" WHERE id = $1"#);

    let result = query(&sql)
        .bind(id)
        .execute(executor)
        .await
        .map_err(|e| sqlx_to_storage(e, "delete record"))?;

    Ok(result.rows_affected() > 0)
}

/// Deletes every matching record and returns the row count.
pub async fn delete_where<'c, E>(
    executor: E,
    table: &str,
    filter: &Filter,
) -> Result<u64, StorageError>
where
    E: PgExecutor<'c>,
{
    let sql = format!(r#"DELETE FROM "{table}"{}"#, where_clause(filter, 1));

    let mut q = query(&sql);
    if let Some(parent) = filter.parent_id() {
        q = q.bind(parent);
    }
    for condition in filter.conditions() {
        q = q.bind(condition.field.as_str()).bind(&condition.value);
    }

    let result = q
        .execute(executor)
        .await
        .map_err(|e| sqlx_to_storage(e, "delete records"))?;

    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_where_clause() {
        assert_eq!(where_clause(&Filter::new(), 1), "");
        assert_eq!(
            where_clause(&Filter::new().eq("phone", "0700"), 1),
            " WHERE resource -> $1::text = $2::jsonb"
        );
        assert_eq!(
            where_clause(&Filter::new().eq("first_name", "Kofi").eq("last_name", "Mensah"), 1),
            " WHERE resource -> $1::text = $2::jsonb AND resource -> $3::text = $4::jsonb"
        );
    }

    #[test]
    fn test_parent_filter_targets_indexed_column() {
        assert_eq!(
            where_clause(&Filter::by_parent("DP-000001"), 1),
            " WHERE parent_id = $1"
        );
        assert_eq!(
            where_clause(&Filter::by_parent("DP-000001").eq("phone", "0700"), 1),
            " WHERE parent_id = $1 AND resource -> $2::text = $3::jsonb"
        );
    }

    #[test]
    fn test_lock_clause() {
        assert_eq!(lock_clause(RowLock::Share), "FOR KEY SHARE");
        assert_eq!(lock_clause(RowLock::Exclusive), "FOR UPDATE");
    }
}
