use crate::error::AppResult;
use crate::utils::table_name;
use sqlx::SqlitePool;

use super::record_write_impl::map_database_error;

/// Initialize the table for one record kind in SQLite
pub async fn init_record_table(pool: &SqlitePool, kind: &str, detailed: bool) -> AppResult<()> {
    let table = table_name(kind)?;

    let table_sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            data TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_on DATETIME,
            created_by TEXT,
            modified_on DATETIME,
            modified_by TEXT,
            synchronized_on DATETIME
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
            "CREATE INDEX IF NOT EXISTS idx_{}_is_deleted ON {} (is_deleted)",
            table, table
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_modified_on ON {} (modified_on)",
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
pub async fn drop_record_table(pool: &SqlitePool, kind: &str) -> AppResult<()> {
    let table = table_name(kind)?;
    let sql = format!("DROP TABLE IF EXISTS {}", table);
    sqlx::query(&sql)
        .execute(pool)
        .await
        .map_err(|e| map_database_error(e, &format!("Failed to drop table {}", table), true))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_record_table_creation() {
        let pool = create_test_pool().await;

        init_record_table(&pool, "notes", true).await.unwrap();
        // Second run must be a no-op
        init_record_table(&pool, "notes", true).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notes")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);

        drop_record_table(&pool, "notes").await.unwrap();
        let missing = sqlx::query("SELECT COUNT(*) FROM notes").fetch_one(&pool).await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_rejects_invalid_kind() {
        let pool = create_test_pool().await;
        let result = init_record_table(&pool, "notes; --", true).await;
        assert!(matches!(result, Err(crate::error::AppError::Configuration(_))));
    }
}
