use async_trait::async_trait;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{ConnectOptions, Connection, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::record_write_impl::{apply_change, map_connection_error, map_database_error};
use super::{record_read_impl, schema};
use crate::backend::database::{ConnectionOptions, ProviderSettings, RowChange, RowFilter};
use crate::backend::{
    DatabaseProvider, DatabaseType, RecordStore, StoreConnection, StoreTransaction,
};
use crate::error::{AppError, AppResult};

/// Seconds a connection waits on a locked database before SQLITE_BUSY
const DEFAULT_BUSY_TIMEOUT_SECS: &str = "5";

/// SQLite provider
///
/// Accepts `sqlite:` URLs, plain `.db` / `.sqlite` paths and `:memory:`.
/// Database files are created on first connect.
#[derive(Debug, Clone, Default)]
pub struct SqliteProvider {
    settings: ProviderSettings,
}

impl SqliteProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl DatabaseProvider for SqliteProvider {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    fn apply_options(
        &self,
        connection_url: &str,
        sensitive_data_logging: bool,
    ) -> AppResult<ConnectionOptions> {
        let options = ConnectionOptions::sqlite(connection_url.trim().to_string())
            .with_max_connections(self.settings.max_connections)
            .with_connection_timeout(self.settings.connection_timeout)
            .with_retry(self.settings.retry.clone())
            .with_detailed_errors(self.settings.detailed_errors)
            .with_sensitive_data_logging(sensitive_data_logging)
            .with_option(
                "busy_timeout".to_string(),
                DEFAULT_BUSY_TIMEOUT_SECS.to_string(),
            );

        options.validate()?;
        Ok(options)
    }

    async fn open_store(&self, options: &ConnectionOptions) -> AppResult<Arc<dyn RecordStore>> {
        options.validate()?;

        let busy_timeout = options
            .get_option("busy_timeout")
            .map(|value| {
                value.parse::<u64>().map_err(|_| {
                    AppError::Configuration(format!("Invalid busy_timeout value: {}", value))
                })
            })
            .transpose()?
            .unwrap_or(5);

        let mut connect_options = SqliteConnectOptions::from_str(&options.connection_url)
            .map_err(|e| {
                AppError::Configuration(format!(
                    "Invalid SQLite connection URL {}: {}",
                    options.display_url(),
                    e
                ))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(busy_timeout));
        if !options.sensitive_data_logging {
            connect_options = connect_options.disable_statement_logging();
        }

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(Duration::from_secs(options.connection_timeout));
        if options.is_memory_database() {
            // sqlx opens `:memory:` as one named shared-cache database, which
            // lives only as long as its last open connection
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options.connect_lazy_with(connect_options);

        info!(
            "SQLite store ready for {} (max {} connections)",
            options.display_url(),
            options.max_connections
        );

        Ok(Arc::new(SqliteRecordStore::new(pool, options.detailed_errors)))
    }
}

/// Pooled SQLite record storage
pub struct SqliteRecordStore {
    pool: SqlitePool,
    detailed_errors: bool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool, detailed_errors: bool) -> Self {
        Self {
            pool,
            detailed_errors,
        }
    }

    /// Get the connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn acquire(&self) -> AppResult<Box<dyn StoreConnection>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_connection_error(e, self.detailed_errors))?;

        Ok(Box::new(SqliteStoreConnection {
            conn,
            detailed_errors: self.detailed_errors,
        }))
    }

    async fn ensure_table(&self, kind: &str) -> AppResult<()> {
        schema::init_record_table(&self.pool, kind, self.detailed_errors).await
    }

    async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_database_error(e, "Health check failed", self.detailed_errors))?;

        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// One pooled SQLite connection owned by a session
pub struct SqliteStoreConnection {
    conn: PoolConnection<Sqlite>,
    detailed_errors: bool,
}

#[async_trait]
impl StoreConnection for SqliteStoreConnection {
    async fn find(&mut self, kind: &str, id: Uuid) -> AppResult<Option<Value>> {
        record_read_impl::find_record(&mut self.conn, kind, id, self.detailed_errors).await
    }

    async fn query(&mut self, kind: &str, filter: &RowFilter) -> AppResult<Vec<Value>> {
        record_read_impl::query_records(&mut self.conn, kind, filter, self.detailed_errors).await
    }

    async fn begin<'c>(&'c mut self) -> AppResult<Box<dyn StoreTransaction + 'c>> {
        let detailed = self.detailed_errors;
        let tx = self
            .conn
            .begin()
            .await
            .map_err(|e| map_database_error(e, "Failed to begin transaction", detailed))?;

        Ok(Box::new(SqliteStoreTransaction {
            tx: Some(tx),
            applied: 0,
            detailed_errors: detailed,
        }))
    }
}

/// Transaction on a session's SQLite connection
pub struct SqliteStoreTransaction<'c> {
    tx: Option<Transaction<'c, Sqlite>>,
    applied: usize,
    detailed_errors: bool,
}

#[async_trait]
impl<'c> StoreTransaction for SqliteStoreTransaction<'c> {
    async fn apply(&mut self, change: &RowChange) -> AppResult<()> {
        let tx = self.tx.as_mut().ok_or_else(finished_transaction)?;
        apply_change(tx, change, self.detailed_errors).await?;
        self.applied += 1;
        Ok(())
    }

    async fn commit(&mut self) -> AppResult<()> {
        let tx = self.tx.take().ok_or_else(finished_transaction)?;
        tx.commit().await.map_err(|e| {
            map_database_error(e, "Failed to commit transaction", self.detailed_errors)
        })?;

        debug!("Flushed {} change(s) to SQLite", self.applied);
        Ok(())
    }
}

fn finished_transaction() -> AppError {
    AppError::SessionState("transaction already committed".to_string())
}
