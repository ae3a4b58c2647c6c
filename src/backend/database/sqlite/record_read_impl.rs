use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, SqliteConnection};
use uuid::Uuid;

use super::record_write_impl::map_database_error;
use crate::backend::database::{restore_creation_stamp, FilterValue, RowFilter};
use crate::error::{AppError, AppResult};
use crate::utils::table_name;

const DOCUMENT_COLUMNS: &str = "data, created_on, created_by";

/// Stored JSON document of one record, kept as TEXT in SQLite
#[derive(Debug, FromRow)]
struct SqliteDocumentRow {
    data: String,
    created_on: Option<DateTime<Utc>>,
    created_by: Option<String>,
}

impl SqliteDocumentRow {
    fn into_value(self) -> AppResult<Value> {
        let mut data: Value = serde_json::from_str(&self.data).map_err(AppError::Serialization)?;
        restore_creation_stamp(&mut data, self.created_on, self.created_by);
        Ok(data)
    }
}

/// Direct key lookup; soft-deleted rows are returned too
pub async fn find_record(
    conn: &mut SqliteConnection,
    kind: &str,
    id: Uuid,
    detailed: bool,
) -> AppResult<Option<Value>> {
    let table = table_name(kind)?;
    let sql = format!("SELECT {} FROM {} WHERE id = ?1", DOCUMENT_COLUMNS, table);

    let row = sqlx::query_as::<_, SqliteDocumentRow>(&sql)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_database_error(e, &format!("Failed to load {} {}", kind, id), detailed))?;

    row.map(SqliteDocumentRow::into_value).transpose()
}

pub async fn query_records(
    conn: &mut SqliteConnection,
    kind: &str,
    filter: &RowFilter,
    detailed: bool,
) -> AppResult<Vec<Value>> {
    let table = table_name(kind)?;
    let (where_clause, values) = filter.to_where_clause(|i| format!("?{}", i));
    let sql = format!(
        "SELECT {} FROM {}{} ORDER BY id",
        DOCUMENT_COLUMNS, table, where_clause
    );

    let mut query = sqlx::query_as::<_, SqliteDocumentRow>(&sql);
    for value in values {
        query = match value {
            FilterValue::Bool(flag) => query.bind(flag),
            FilterValue::Timestamp(ts) => query.bind(ts),
        };
    }

    let rows = query
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_database_error(e, &format!("Failed to query {}", kind), detailed))?;

    rows.into_iter().map(SqliteDocumentRow::into_value).collect()
}
