use serde_json::Value;
use sqlx::SqliteConnection;

use crate::backend::database::{describe_error, RecordRow, RowChange};
use crate::error::{AppError, AppResult};
use crate::utils::table_name;

// Primary result codes; extended codes carry them in the low byte
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Convert JSON Value to String for SQLite TEXT storage
fn json_value_to_string(value: &Value) -> AppResult<String> {
    serde_json::to_string(value).map_err(AppError::Serialization)
}

/// Apply one change on the open transaction
pub async fn apply_change(
    conn: &mut SqliteConnection,
    change: &RowChange,
    detailed: bool,
) -> AppResult<()> {
    match change {
        RowChange::Insert { kind, row } => insert_record(conn, kind, row, detailed).await,
        RowChange::Update {
            kind,
            row,
            expected_version,
        } => update_record(conn, kind, row, *expected_version, detailed).await,
        RowChange::Delete { kind, id } => {
            let table = table_name(kind)?;
            let sql = format!("DELETE FROM {} WHERE id = ?1", table);

            let result = sqlx::query(&sql)
                .bind(id.to_string())
                .execute(&mut *conn)
                .await
                .map_err(|e| map_database_error(e, &format!("Failed to delete {} {}", kind, id), detailed))?;

            if result.rows_affected() == 0 {
                return Err(AppError::Concurrency {
                    kind: kind.to_string(),
                    id: id.to_string(),
                });
            }
            Ok(())
        }
    }
}

async fn insert_record(
    conn: &mut SqliteConnection,
    kind: &str,
    row: &RecordRow,
    detailed: bool,
) -> AppResult<()> {
    let table = table_name(kind)?;
    let sql = format!(
        "INSERT INTO {} (id, data, version, is_deleted, created_on, created_by, modified_on, modified_by, synchronized_on) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        table
    );

    // SQLite: JSON as TEXT
    let data = json_value_to_string(&row.data)?;

    sqlx::query(&sql)
        .bind(row.id.to_string())
        .bind(data)
        .bind(row.version)
        .bind(row.is_deleted)
        .bind(row.created_on)
        .bind(&row.created_by)
        .bind(row.modified_on)
        .bind(&row.modified_by)
        .bind(row.synchronized_on)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_database_error(e, &format!("Failed to insert {} {}", kind, row.id), detailed))?;

    Ok(())
}

/// Update a row; `created_on` / `created_by` are never rewritten and
/// readers take them from the columns
async fn update_record(
    conn: &mut SqliteConnection,
    kind: &str,
    row: &RecordRow,
    expected_version: Option<i64>,
    detailed: bool,
) -> AppResult<()> {
    let table = table_name(kind)?;
    let mut sql = format!(
        "UPDATE {} SET data = ?1, version = ?2, is_deleted = ?3, modified_on = ?4, modified_by = ?5, synchronized_on = ?6 WHERE id = ?7",
        table
    );
    if expected_version.is_some() {
        sql.push_str(" AND version = ?8");
    }

    let data = json_value_to_string(&row.data)?;

    let mut query = sqlx::query(&sql)
        .bind(data)
        .bind(row.version)
        .bind(row.is_deleted)
        .bind(row.modified_on)
        .bind(&row.modified_by)
        .bind(row.synchronized_on)
        .bind(row.id.to_string());
    if let Some(version) = expected_version {
        query = query.bind(version);
    }

    let result = query
        .execute(&mut *conn)
        .await
        .map_err(|e| map_database_error(e, &format!("Failed to update {} {}", kind, row.id), detailed))?;

    if result.rows_affected() == 0 {
        return Err(AppError::Concurrency {
            kind: kind.to_string(),
            id: row.id.to_string(),
        });
    }

    Ok(())
}

/// Whether a SQLite failure is worth retrying
///
/// A busy or locked database clears once the competing writer finishes.
pub fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(is_transient_result_code)
            .unwrap_or(false),
        _ => false,
    }
}

fn is_transient_result_code(code: i32) -> bool {
    matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)
}

/// Map SQLite database errors to AppError using common logic
pub fn map_database_error(e: sqlx::Error, operation: &str, detailed: bool) -> AppError {
    if is_transient(&e) {
        return AppError::Transient(describe_error(operation, &e, detailed));
    }

    match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::Commit(format!("{}: record already exists", operation))
        }
        _ => AppError::Database(describe_error(operation, &e, detailed)),
    }
}

/// Map failures to obtain a connection; anything not transient is terminal
pub fn map_connection_error(e: sqlx::Error, detailed: bool) -> AppError {
    if is_transient(&e) {
        AppError::Transient(describe_error("Failed to open SQLite database", &e, detailed))
    } else {
        AppError::Connectivity(describe_error("Failed to open SQLite database", &e, detailed))
    }
}
