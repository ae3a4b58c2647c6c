use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::backend::DatabaseType;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub db_type: String,
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Logs record payloads, actor ids and the unredacted address
    #[serde(default)]
    pub sensitive_data_logging: bool,
    #[serde(default = "default_true")]
    pub detailed_errors: bool,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    6
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SessionConfig {
    /// Notify the commit observer even when a commit had nothing to write
    #[serde(default)]
    pub notify_on_empty_commit: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `audit_context=debug`
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load configuration from YAML file
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, String> {
        let path = config_path.as_ref();

        if !path.exists() {
            return Err(format!("Configuration file not found: {}", path.display()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        // Expand environment variables in YAML content
        let expanded_content = Self::expand_env_vars(&content)?;

        let app_config: AppConfig = serde_yaml::from_str(&expanded_content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Create default configuration for an in-memory SQLite database
    pub fn default_config() -> Self {
        AppConfig {
            database: DatabaseConfig {
                db_type: "sqlite".to_string(),
                url: ":memory:".to_string(),
                max_connections: default_max_connections(),
                connection_timeout: default_connection_timeout(),
                sensitive_data_logging: false,
                detailed_errors: true,
                retry: RetryConfig::default(),
            },
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        DatabaseType::from_config_name(&self.database.db_type).map_err(|e| e.to_string())?;

        if self.database.max_connections == 0 {
            return Err("database.max_connections must be at least 1".to_string());
        }

        let retry = &self.database.retry;
        if retry.max_delay_ms < retry.base_delay_ms {
            return Err(format!(
                "database.retry.max_delay_ms ({}) must not be lower than base_delay_ms ({})",
                retry.max_delay_ms, retry.base_delay_ms
            ));
        }

        Ok(())
    }

    /// Expand environment variables in format ${VAR_NAME} or ${VAR_NAME:-default}
    fn expand_env_vars(content: &str) -> Result<String, String> {
        let chars: Vec<char> = content.chars().collect();
        let mut expanded = String::new();
        let mut i = 0;

        while i < chars.len() {
            if i + 1 < chars.len() && chars[i] == '$' && chars[i + 1] == '{' {
                // Find the closing brace
                let mut j = i + 2;
                while j < chars.len() && chars[j] != '}' {
                    j += 1;
                }

                if j < chars.len() {
                    let var_expr: String = chars[i + 2..j].iter().collect();

                    let (var_name, default_value) = match var_expr.find(":-") {
                        Some(pos) => (
                            var_expr[..pos].to_string(),
                            Some(var_expr[pos + 2..].to_string()),
                        ),
                        None => (var_expr, None),
                    };

                    let value = match std::env::var(&var_name) {
                        Ok(val) => val,
                        Err(_) => match default_value {
                            Some(default) => default,
                            None => {
                                return Err(format!(
                                    "Environment variable {} not found and no default provided",
                                    var_name
                                ))
                            }
                        },
                    };

                    expanded.push_str(&value);
                    i = j + 1;
                } else {
                    expanded.push(chars[i]);
                    i += 1;
                }
            } else {
                expanded.push(chars[i]);
                i += 1;
            }
        }

        Ok(expanded)
    }
}
