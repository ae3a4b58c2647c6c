use async_trait::async_trait;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, Connection, PgPool, Postgres, Transaction};
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

const DEFAULT_APPLICATION_NAME: &str = "audit-context";

/// PostgreSQL provider
///
/// Accepts `postgres://` / `postgresql://` addresses and stores records as
/// JSONB documents keyed by UUID.
#[derive(Debug, Clone, Default)]
pub struct PostgresProvider {
    settings: ProviderSettings,
}

impl PostgresProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl DatabaseProvider for PostgresProvider {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    fn apply_options(
        &self,
        connection_url: &str,
        sensitive_data_logging: bool,
    ) -> AppResult<ConnectionOptions> {
        let options = ConnectionOptions::postgres(connection_url.trim().to_string())
            .with_max_connections(self.settings.max_connections)
            .with_connection_timeout(self.settings.connection_timeout)
            .with_retry(self.settings.retry.clone())
            .with_detailed_errors(self.settings.detailed_errors)
            .with_sensitive_data_logging(sensitive_data_logging)
            .with_option(
                "application_name".to_string(),
                DEFAULT_APPLICATION_NAME.to_string(),
            );

        options.validate()?;

        // Catch malformed URLs here rather than on first connect
        PgConnectOptions::from_str(&options.connection_url).map_err(|e| {
            AppError::Configuration(format!(
                "Invalid PostgreSQL connection URL {}: {}",
                options.display_url(),
                e
            ))
        })?;

        Ok(options)
    }

    async fn open_store(&self, options: &ConnectionOptions) -> AppResult<Arc<dyn RecordStore>> {
        options.validate()?;

        let mut connect_options = PgConnectOptions::from_str(&options.connection_url)
            .map_err(|e| {
                AppError::Configuration(format!("Invalid PostgreSQL connection URL: {}", e))
            })?;
        if let Some(name) = options.get_option("application_name") {
            connect_options = connect_options.application_name(name);
        }
        if !options.sensitive_data_logging {
            connect_options = connect_options.disable_statement_logging();
        }

        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(Duration::from_secs(options.connection_timeout))
            .connect_lazy_with(connect_options);

        info!(
            "PostgreSQL store ready for {} (max {} connections)",
            options.display_url(),
            options.max_connections
        );

        Ok(Arc::new(PostgresRecordStore::new(
            pool,
            options.detailed_errors,
        )))
    }
}

/// Pooled PostgreSQL record storage
pub struct PostgresRecordStore {
    pool: PgPool,
    detailed_errors: bool,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool, detailed_errors: bool) -> Self {
        Self {
            pool,
            detailed_errors,
        }
    }

    /// Get the connection pool reference
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn acquire(&self) -> AppResult<Box<dyn StoreConnection>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_connection_error(e, self.detailed_errors))?;

        Ok(Box::new(PostgresStoreConnection {
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

/// One pooled PostgreSQL connection owned by a session
pub struct PostgresStoreConnection {
    conn: PoolConnection<Postgres>,
    detailed_errors: bool,
}

#[async_trait]
impl StoreConnection for PostgresStoreConnection {
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

        Ok(Box::new(PostgresStoreTransaction {
            tx: Some(tx),
            applied: 0,
            detailed_errors: detailed,
        }))
    }
}

/// Transaction on a session's PostgreSQL connection
pub struct PostgresStoreTransaction<'c> {
    tx: Option<Transaction<'c, Postgres>>,
    applied: usize,
    detailed_errors: bool,
}

#[async_trait]
impl<'c> StoreTransaction for PostgresStoreTransaction<'c> {
    async fn apply(&mut self, change: &RowChange) -> AppResult<()> {
        let tx = self.tx.as_mut().ok_or_else(|| {
            AppError::SessionState("transaction already committed".to_string())
        })?;
        apply_change(tx, change, self.detailed_errors).await?;
        self.applied += 1;
        Ok(())
    }

    async fn commit(&mut self) -> AppResult<()> {
        let tx = self.tx.take().ok_or_else(|| {
            AppError::SessionState("transaction already committed".to_string())
        })?;
        tx.commit().await.map_err(|e| {
            map_database_error(e, "Failed to commit transaction", self.detailed_errors)
        })?;

        debug!("Flushed {} change(s) to PostgreSQL", self.applied);
        Ok(())
    }
}
