pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod session;
pub mod startup;
pub mod utils;

// Re-export commonly used types for easier access
pub use error::{AppError, AppResult};
pub use models::{AuditFields, Record};
pub use session::{
    CommitObserver, CommitSummary, ConnectionResolver, PersistenceSession, RecordSet,
    SessionFactory, SessionState,
};
