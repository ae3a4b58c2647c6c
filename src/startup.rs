use std::sync::Arc;

use crate::backend::ProviderFactory;
use crate::config::AppConfig;
use crate::error::AppResult;
use crate::session::{CommitObserver, ConfigConnectionResolver, SessionFactory};

/// Wire a session factory from configuration
///
/// The address comes from `database.url`, pool and retry settings from the
/// rest of the `database` section, and the empty-commit policy from
/// `session`.
pub async fn build_session_factory(
    config: &AppConfig,
    observer: Arc<dyn CommitObserver>,
) -> AppResult<SessionFactory> {
    let provider = ProviderFactory::from_config(&config.database)?;
    let resolver = Arc::new(ConfigConnectionResolver::new(&config.database));

    SessionFactory::builder(resolver, provider)
        .observer(observer)
        .sensitive_data_logging(config.database.sensitive_data_logging)
        .notify_on_empty_commit(config.session.notify_on_empty_commit)
        .build()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DatabaseType;
    use crate::error::AppError;
    use crate::session::NoopObserver;

    #[tokio::test]
    async fn test_build_from_default_config() {
        let config = AppConfig::default_config();
        let factory = build_session_factory(&config, Arc::new(NoopObserver))
            .await
            .unwrap();

        assert_eq!(factory.database_type(), DatabaseType::SQLite);
        assert_eq!(factory.options().max_connections, 10);
        factory.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_settings_flow_into_options() {
        let mut config = AppConfig::default_config();
        config.database.retry.max_retries = 2;
        config.database.retry.base_delay_ms = 10;
        config.database.detailed_errors = false;

        let factory = build_session_factory(&config, Arc::new(NoopObserver))
            .await
            .unwrap();
        let options = factory.options();
        assert_eq!(options.retry.max_retries, 2);
        assert_eq!(options.retry.base_delay, std::time::Duration::from_millis(10));
        assert!(!options.detailed_errors);
    }

    #[tokio::test]
    async fn test_unsupported_type_is_configuration_error() {
        let mut config = AppConfig::default_config();
        config.database.db_type = "mssql".to_string();

        let result = build_session_factory(&config, Arc::new(NoopObserver)).await;
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }
}
