//! Database abstraction layer for audited record storage
//!
//! This module provides a unified interface for record storage across
//! different database backends (PostgreSQL, SQLite) while keeping the
//! dialect-specific SQL and error classification in each backend.
//!
//! # Architecture
//!
//! ```text
//! Shared logic (config.rs, retry.rs, row.rs)
//!     ↓
//! Database-specific implementations
//!     ├── postgres/ (PostgreSQL-specific code)
//!     └── sqlite/   (SQLite-specific code)
//! ```

pub mod config;
pub mod postgres;
pub mod retry;
pub mod row;
pub mod sqlite;

use std::time::Duration;

// Re-export key types for convenience
pub use config::ConnectionOptions;
pub use retry::RetryPolicy;
pub use row::{restore_creation_stamp, FilterValue, RecordRow, RowChange, RowFilter};

pub use postgres::PostgresProvider;
pub use sqlite::SqliteProvider;

/// Pool, retry and diagnostics settings a provider applies to every address
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub retry: RetryPolicy,
    pub detailed_errors: bool,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connection_timeout: 30,
            retry: RetryPolicy::default(),
            detailed_errors: true,
        }
    }
}

impl From<&crate::config::DatabaseConfig> for ProviderSettings {
    fn from(config: &crate::config::DatabaseConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            connection_timeout: config.connection_timeout,
            retry: RetryPolicy::new(
                config.retry.max_retries,
                Duration::from_millis(config.retry.base_delay_ms),
                Duration::from_millis(config.retry.max_delay_ms),
            ),
            detailed_errors: config.detailed_errors,
        }
    }
}

/// Render a driver error for the caller, hiding driver text unless detailed
/// errors are enabled
pub(crate) fn describe_error(operation: &str, error: &sqlx::Error, detailed: bool) -> String {
    if detailed {
        format!("{}: {}", operation, error)
    } else {
        format!("{} (enable detailed errors for the driver message)", operation)
    }
}
