use sqlx::PgConnection;

use crate::backend::database::{describe_error, RecordRow, RowChange};
use crate::error::{AppError, AppResult};
use crate::utils::table_name;

/// Apply one change on the open transaction
pub async fn apply_change(conn: &mut PgConnection, change: &RowChange, detailed: bool) -> AppResult<()> {
    match change {
        RowChange::Insert { kind, row } => insert_record(conn, kind, row, detailed).await,
        RowChange::Update {
            kind,
            row,
            expected_version,
        } => update_record(conn, kind, row, *expected_version, detailed).await,
        RowChange::Delete { kind, id } => {
            let table = table_name(kind)?;
            let sql = format!("DELETE FROM {} WHERE id = $1", table);

            let result = sqlx::query(&sql)
                .bind(id)
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
    conn: &mut PgConnection,
    kind: &str,
    row: &RecordRow,
    detailed: bool,
) -> AppResult<()> {
    let table = table_name(kind)?;
    let sql = format!(
        "INSERT INTO {} (id, data, version, is_deleted, created_on, created_by, modified_on, modified_by, synchronized_on) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        table
    );

    sqlx::query(&sql)
        .bind(row.id)
        .bind(&row.data) // PostgreSQL uses JSONB
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
    conn: &mut PgConnection,
    kind: &str,
    row: &RecordRow,
    expected_version: Option<i64>,
    detailed: bool,
) -> AppResult<()> {
    let table = table_name(kind)?;
    let mut sql = format!(
        "UPDATE {} SET data = $1, version = $2, is_deleted = $3, modified_on = $4, modified_by = $5, synchronized_on = $6 WHERE id = $7",
        table
    );
    if expected_version.is_some() {
        sql.push_str(" AND version = $8");
    }

    let mut query = sqlx::query(&sql)
        .bind(&row.data)
        .bind(row.version)
        .bind(row.is_deleted)
        .bind(row.modified_on)
        .bind(&row.modified_by)
        .bind(row.synchronized_on)
        .bind(row.id);
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

/// Whether a PostgreSQL failure is worth retrying
///
/// Connection exceptions (class 08), serialization failures, deadlocks,
/// connection limits and server shutdown/startup states are transient.
pub fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| is_transient_sqlstate(&code))
            .unwrap_or(false),
        _ => false,
    }
}

fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08")
        || matches!(
            code,
            "40001" | "40P01" | "53300" | "55P03" | "57P01" | "57P02" | "57P03"
        )
}

/// Map PostgreSQL-specific database errors to appropriate application errors
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
        AppError::Transient(describe_error("Failed to connect to PostgreSQL", &e, detailed))
    } else {
        AppError::Connectivity(describe_error("Failed to connect to PostgreSQL", &e, detailed))
    }
}
