//! PostgreSQL backend: JSONB documents, UUID keys, SQLSTATE-based
//! transient error classification.

pub mod backend_impl;
pub mod record_read_impl;
pub mod record_write_impl;
pub mod schema;

pub use backend_impl::{PostgresProvider, PostgresRecordStore, PostgresStoreConnection};
pub use record_write_impl::{is_transient, map_database_error};
