//! Utility functions shared by the providers and the session layer

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{AppError, AppResult};

lazy_static! {
    /// Plain SQL identifier accepted as a record kind / table name
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").unwrap();
}

/// Validate a record kind and return it as a table name
///
/// Record kinds are interpolated into SQL, so anything that is not a plain
/// identifier is rejected as a configuration error.
///
/// # Examples
/// ```
/// use audit_context::utils::table_name;
///
/// assert_eq!(table_name("notes").unwrap(), "notes");
/// assert!(table_name("notes; DROP TABLE notes").is_err());
/// ```
pub fn table_name(kind: &str) -> AppResult<&str> {
    if IDENTIFIER.is_match(kind) {
        Ok(kind)
    } else {
        Err(AppError::Configuration(format!(
            "Record kind '{}' is not a valid table name",
            kind
        )))
    }
}

/// Mask the password component of a connection URL for logging
///
/// Addresses that do not parse as URLs (plain SQLite paths, `:memory:`) carry
/// no credentials and are returned unchanged.
pub fn redact_connection_url(connection_url: &str) -> String {
    match url::Url::parse(connection_url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("***")).is_ok() {
                parsed.to_string()
            } else {
                "<redacted>".to_string()
            }
        }
        _ => connection_url.to_string(),
    }
}
