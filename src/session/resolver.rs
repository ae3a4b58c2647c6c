use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};

/// Source of the administrative connection string
///
/// The string is handed to the provider when the factory is built; providers
/// reject empty or malformed addresses with `AppError::Configuration`.
pub trait ConnectionResolver: Send + Sync {
    fn admin_connection_string(&self) -> &str;
}

/// A fixed address, typically from code or a test
#[derive(Debug, Clone)]
pub struct StaticConnectionResolver {
    connection_string: String,
}

impl StaticConnectionResolver {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
        }
    }
}

impl ConnectionResolver for StaticConnectionResolver {
    fn admin_connection_string(&self) -> &str {
        &self.connection_string
    }
}

/// Reads the address from an environment variable once, at construction
#[derive(Debug, Clone)]
pub struct EnvConnectionResolver {
    variable: String,
    connection_string: String,
}

impl EnvConnectionResolver {
    pub fn new(variable: impl Into<String>) -> AppResult<Self> {
        let variable = variable.into();
        let connection_string = std::env::var(&variable).map_err(|_| {
            AppError::Configuration(format!("Environment variable {} is not set", variable))
        })?;

        if connection_string.trim().is_empty() {
            return Err(AppError::Configuration(format!(
                "Environment variable {} is empty",
                variable
            )));
        }

        Ok(Self {
            variable,
            connection_string,
        })
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }
}

impl ConnectionResolver for EnvConnectionResolver {
    fn admin_connection_string(&self) -> &str {
        &self.connection_string
    }
}

/// Takes the address from the `database.url` setting
#[derive(Debug, Clone)]
pub struct ConfigConnectionResolver {
    connection_string: String,
}

impl ConfigConnectionResolver {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            connection_string: config.url.clone(),
        }
    }
}

impl ConnectionResolver for ConfigConnectionResolver {
    fn admin_connection_string(&self) -> &str {
        &self.connection_string
    }
}
