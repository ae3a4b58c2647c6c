use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// Missing or malformed settings, including the connection address
    Configuration(String),
    /// Retryable driver failure; retry loops turn it into `Connectivity` once exhausted
    Transient(String),
    Connectivity(String),
    /// An update or delete matched no row at the expected version
    ///
    /// A commit retried after a lost acknowledgement can also hit this for its
    /// own earlier write; see `PersistenceSession::commit`.
    Concurrency { kind: String, id: String },
    Commit(String),
    Database(String),
    Serialization(serde_json::Error),
    SessionState(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Configuration(e) => write!(f, "Configuration error: {}", e),
            AppError::Transient(e) => write!(f, "Transient failure: {}", e),
            AppError::Connectivity(e) => write!(f, "Connectivity error: {}", e),
            AppError::Concurrency { kind, id } => write!(
                f,
                "Concurrency conflict: {} {} was modified or removed since it was loaded",
                kind, id
            ),
            AppError::Commit(e) => write!(f, "Commit failed: {}", e),
            AppError::Database(e) => write!(f, "Database error: {}", e),
            AppError::Serialization(e) => write!(f, "Serialization error: {}", e),
            AppError::SessionState(e) => write!(f, "Invalid session state: {}", e),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err)
    }
}

impl AppError {
    /// Whether a retry policy may re-run the failed operation
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Transient(_))
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, AppError::Concurrency { .. })
    }

    /// Fold a failure raised while flushing into the commit taxonomy.
    ///
    /// Concurrency, connectivity and state errors keep their identity so callers
    /// can react to them; everything else becomes a `Commit` error.
    pub fn into_commit_error(self) -> AppError {
        match self {
            AppError::Concurrency { .. }
            | AppError::Connectivity(_)
            | AppError::SessionState(_)
            | AppError::Configuration(_) => self,
            AppError::Transient(e) => AppError::Connectivity(e),
            AppError::Commit(e) => AppError::Commit(e),
            AppError::Database(e) => AppError::Commit(e),
            AppError::Serialization(e) => AppError::Commit(format!("failed to serialize record: {}", e)),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
