//! SQLite backend: JSON documents stored as TEXT, result-code based
//! transient error classification (BUSY / LOCKED).

pub mod backend_impl;
pub mod record_read_impl;
pub mod record_write_impl;
pub mod schema;

pub use backend_impl::{SqliteProvider, SqliteRecordStore, SqliteStoreConnection};
pub use record_write_impl::{is_transient, map_database_error};
