use crate::backend::database::{ConnectionOptions, RowChange, RowFilter};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub mod database;

/// Supported database backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    /// Parse the `database.type` configuration value
    pub fn from_config_name(name: &str) -> AppResult<Self> {
        match name {
            "postgresql" | "postgres" => Ok(DatabaseType::PostgreSQL),
            "sqlite" => Ok(DatabaseType::SQLite),
            other => Err(AppError::Configuration(format!(
                "Unsupported database type: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::PostgreSQL => "postgresql",
            DatabaseType::SQLite => "sqlite",
        }
    }
}

/// Provider-specific connection policy
///
/// Each backend decides how a raw administrative address turns into
/// connection options (retry policy, diagnostic flags, driver extras) and
/// how those options become a pooled record store. Everything around it,
/// sessions, auditing and observers, is shared.
#[async_trait]
pub trait DatabaseProvider: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    /// Build connection options from the resolver's address
    ///
    /// Retry-on-transient-failure and detailed errors are always enabled;
    /// sensitive data logging only when the caller asks for it.
    fn apply_options(
        &self,
        connection_url: &str,
        sensitive_data_logging: bool,
    ) -> AppResult<ConnectionOptions>;

    /// Create the pooled store. Connections are opened lazily.
    async fn open_store(&self, options: &ConnectionOptions) -> AppResult<Arc<dyn RecordStore>>;
}

/// Pool-level storage operations
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Check out one connection for the lifetime of a session
    async fn acquire(&self) -> AppResult<Box<dyn StoreConnection>>;

    /// Create the table for a record kind if it does not exist yet
    async fn ensure_table(&self, kind: &str) -> AppResult<()>;

    /// Check if the storage backend is healthy and accessible
    async fn health_check(&self) -> AppResult<()>;

    /// Close the pool; in-flight connections finish first
    async fn close(&self) {}
}

/// Operations over a single checked-out connection
///
/// Dropping the value returns the connection to its pool.
#[async_trait]
pub trait StoreConnection: Send {
    /// Direct key lookup, soft-deleted rows included
    async fn find(&mut self, kind: &str, id: Uuid) -> AppResult<Option<Value>>;

    async fn query(&mut self, kind: &str, filter: &RowFilter) -> AppResult<Vec<Value>>;

    /// Open a transaction on this connection
    async fn begin<'c>(&'c mut self) -> AppResult<Box<dyn StoreTransaction + 'c>>;

    /// Apply all changes inside one transaction
    ///
    /// Either every change is committed or the transaction is rolled back and
    /// the error returned. Update and delete statements that match no row
    /// fail with `AppError::Concurrency`.
    async fn flush(&mut self, changes: &[RowChange]) -> AppResult<()> {
        let mut tx = self.begin().await?;
        // An early return drops `tx`, which rolls the transaction back
        for change in changes {
            tx.apply(change).await?;
        }
        tx.commit().await
    }
}

/// An open transaction
///
/// Dropping it without calling `commit` rolls the transaction back, including
/// when the future driving it is cancelled.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn apply(&mut self, change: &RowChange) -> AppResult<()>;

    /// Commit every applied change. The transaction cannot be used afterwards.
    async fn commit(&mut self) -> AppResult<()>;
}

/// Factory for creating providers
pub struct ProviderFactory;

impl ProviderFactory {
    /// Pick the provider for a database type
    pub fn create(database_type: DatabaseType) -> Arc<dyn DatabaseProvider> {
        match database_type {
            DatabaseType::PostgreSQL => Arc::new(database::postgres::PostgresProvider::default()),
            DatabaseType::SQLite => Arc::new(database::sqlite::SqliteProvider::default()),
        }
    }

    /// Pick the provider and carry over pool and retry settings from config
    pub fn from_config(
        config: &crate::config::DatabaseConfig,
    ) -> AppResult<Arc<dyn DatabaseProvider>> {
        let settings = database::ProviderSettings::from(config);
        let provider: Arc<dyn DatabaseProvider> =
            match DatabaseType::from_config_name(&config.db_type)? {
                DatabaseType::PostgreSQL => {
                    Arc::new(database::postgres::PostgresProvider::new(settings))
                }
                DatabaseType::SQLite => Arc::new(database::sqlite::SqliteProvider::new(settings)),
            };
        Ok(provider)
    }
}
