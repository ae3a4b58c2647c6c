use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use super::record_write_impl::map_database_error;
use crate::backend::database::{restore_creation_stamp, FilterValue, RowFilter};
use crate::error::AppResult;
use crate::utils::table_name;

const DOCUMENT_COLUMNS: &str = "data, created_on, created_by";

/// Stored JSON document of one record
#[derive(Debug, FromRow)]
struct PgDocumentRow {
    data: Value,
    created_on: Option<DateTime<Utc>>,
    created_by: Option<String>,
}

impl PgDocumentRow {
    fn into_value(self) -> Value {
        let mut data = self.data;
        restore_creation_stamp(&mut data, self.created_on, self.created_by);
        data
    }
}

/// Direct key lookup; soft-deleted rows are returned too
pub async fn find_record(
    conn: &mut PgConnection,
    kind: &str,
    id: Uuid,
    detailed: bool,
) -> AppResult<Option<Value>> {
    let table = table_name(kind)?;
    let sql = format!("SELECT {} FROM {} WHERE id = $1", DOCUMENT_COLUMNS, table);

    let row = sqlx::query_as::<_, PgDocumentRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_database_error(e, &format!("Failed to load {} {}", kind, id), detailed))?;

    Ok(row.map(PgDocumentRow::into_value))
}

pub async fn query_records(
    conn: &mut PgConnection,
    kind: &str,
    filter: &RowFilter,
    detailed: bool,
) -> AppResult<Vec<Value>> {
    let table = table_name(kind)?;
    let (where_clause, values) = filter.to_where_clause(|i| format!("${}", i));
    let sql = format!(
        "SELECT {} FROM {}{} ORDER BY id",
        DOCUMENT_COLUMNS, table, where_clause
    );

    let mut query = sqlx::query_as::<_, PgDocumentRow>(&sql);
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

    Ok(rows.into_iter().map(PgDocumentRow::into_value).collect())
}
