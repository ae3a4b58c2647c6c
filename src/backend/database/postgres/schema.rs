use crate::error::AppResult;
use crate::utils::table_name;
use sqlx::PgPool;

use super::record_write_impl::map_database_error;

/// Initialize the table for one record kind in PostgreSQL
///
/// The full record lives in the JSONB `data` column; the audit columns
/// mirror it for filtering and optimistic concurrency checks.
pub async fn init_record_table(pool: &PgPool, kind: &str, detailed: bool) -> AppResult<()> {
    let table = table_name(kind)?;

    let table_sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id UUID PRIMARY KEY,
            data JSONB NOT NULL,
            version BIGINT NOT NULL DEFAULT 0,
            is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
            created_on TIMESTAMP WITH TIME ZONE,
            created_by TEXT,
            modified_on TIMESTAMP WITH TIME ZONE,
            modified_by TEXT,
            synchronized_on TIMESTAMP WITH TIME ZONE
        )
        "#,
        table
    );

    sqlx::query(&table_sql)
        .execute(pool)
        .await
        .map_err(|e| map_database_error(e, &format!("Failed to create {} table", table), detailed))?;

    let indexes = vec![
        format!(
            "CREATE INDEX IF NOT EXISTS \"idx_{}_is_deleted\" ON {} (is_deleted)",
            table, table
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS \"idx_{}_modified_on\" ON {} (modified_on)",
            table, table
        ),
    ];

    for sql in &indexes {
        sqlx::query(sql)
            .execute(pool)
            .await
            .map_err(|e| map_database_error(e, "Failed to create index", detailed))?;
    }

    Ok(())
}

/// Drop the table for one record kind (for cleanup/testing)
#[allow(dead_code)]
pub async fn drop_record_table(pool: &PgPool, kind: &str) -> AppResult<()> {
    let table = table_name(kind)?;
    let sql = format!("DROP TABLE IF EXISTS {} CASCADE", table);
    sqlx::query(&sql)
        .execute(pool)
        .await
        .map_err(|e| map_database_error(e, &format!("Failed to drop table {}", table), true))?;

    Ok(())
}
