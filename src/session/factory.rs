use std::sync::Arc;
use tracing::{info, warn};

use super::interceptor::{AuditInterceptor, Clock, SystemClock};
use super::observer::{CommitObserver, NoopObserver};
use super::resolver::ConnectionResolver;
use super::unit_of_work::{PersistenceSession, SessionSettings};
use crate::backend::database::ConnectionOptions;
use crate::backend::{DatabaseProvider, DatabaseType, RecordStore};
use crate::error::AppResult;
use crate::models::Record;
use crate::utils::table_name;

/// Builds persistence sessions bound to one database.
///
/// Connection options are resolved once, when the factory is built, from the
/// resolver's address and the provider's policy. Every session shares the
/// factory's pool, audit interceptor and commit observer.
pub struct SessionFactory {
    resolver: Arc<dyn ConnectionResolver>,
    provider: Arc<dyn DatabaseProvider>,
    options: ConnectionOptions,
    store: Arc<dyn RecordStore>,
    interceptor: Arc<AuditInterceptor>,
    observer: Arc<dyn CommitObserver>,
    notify_on_empty_commit: bool,
}

pub struct SessionFactoryBuilder {
    resolver: Arc<dyn ConnectionResolver>,
    provider: Arc<dyn DatabaseProvider>,
    observer: Arc<dyn CommitObserver>,
    clock: Arc<dyn Clock>,
    sensitive_data_logging: bool,
    notify_on_empty_commit: bool,
}

impl SessionFactoryBuilder {
    pub fn observer(mut self, observer: Arc<dyn CommitObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Time source for audit stamps
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Log record payloads, actor ids and the unredacted address
    pub fn sensitive_data_logging(mut self, enabled: bool) -> Self {
        self.sensitive_data_logging = enabled;
        self
    }

    /// Notify the observer for commits with nothing to write
    pub fn notify_on_empty_commit(mut self, enabled: bool) -> Self {
        self.notify_on_empty_commit = enabled;
        self
    }

    /// Resolve connection options and create the pool
    ///
    /// Fails with `AppError::Configuration` for an empty or malformed
    /// address. No connection is opened yet.
    pub async fn build(self) -> AppResult<SessionFactory> {
        let options = self.provider.apply_options(
            self.resolver.admin_connection_string(),
            self.sensitive_data_logging,
        )?;

        if options.sensitive_data_logging {
            warn!(
                "Sensitive data logging is enabled for {}: record payloads and actor ids will be logged. Do not enable this in production.",
                options.display_url()
            );
        }

        let store = self.provider.open_store(&options).await?;

        info!(
            "Session factory ready: {} at {} (retry up to {} times)",
            options.database_type.as_str(),
            options.display_url(),
            options.retry.max_retries
        );

        Ok(SessionFactory {
            resolver: self.resolver,
            provider: self.provider,
            options,
            store,
            interceptor: Arc::new(AuditInterceptor::new(self.clock)),
            observer: self.observer,
            notify_on_empty_commit: self.notify_on_empty_commit,
        })
    }
}

impl SessionFactory {
    pub fn builder(
        resolver: Arc<dyn ConnectionResolver>,
        provider: Arc<dyn DatabaseProvider>,
    ) -> SessionFactoryBuilder {
        SessionFactoryBuilder {
            resolver,
            provider,
            observer: Arc::new(NoopObserver),
            clock: Arc::new(SystemClock),
            sensitive_data_logging: false,
            notify_on_empty_commit: false,
        }
    }

    /// Provider connection options for the resolver's current address
    pub fn apply_options(&self, sensitive_data_logging: bool) -> AppResult<ConnectionOptions> {
        self.provider
            .apply_options(self.resolver.admin_connection_string(), sensitive_data_logging)
    }

    /// Options the factory was built with
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn database_type(&self) -> DatabaseType {
        self.provider.database_type()
    }

    /// Open a session on a pooled connection, retrying transient failures
    pub async fn create(&self) -> AppResult<PersistenceSession> {
        let store = self.store.clone();
        let conn = self
            .options
            .retry
            .execute("Open session", || {
                let store = store.clone();
                async move { store.acquire().await }
            })
            .await?;

        let settings = SessionSettings {
            interceptor: self.interceptor.clone(),
            observer: self.observer.clone(),
            retry: self.options.retry.clone(),
            notify_on_empty_commit: self.notify_on_empty_commit,
            sensitive_data_logging: self.options.sensitive_data_logging,
        };

        Ok(PersistenceSession::new(conn, self.store.clone(), settings))
    }

    /// Create the table backing a record kind if it is missing
    pub async fn ensure_record_set<T: Record>(&self) -> AppResult<()> {
        let kind = table_name(T::KIND)?;
        let store = self.store.clone();
        self.options
            .retry
            .execute("Create record table", || {
                let store = store.clone();
                async move { store.ensure_table(kind).await }
            })
            .await
    }

    pub async fn health_check(&self) -> AppResult<()> {
        let store = self.store.clone();
        self.options
            .retry
            .execute("Health check", || {
                let store = store.clone();
                async move { store.health_check().await }
            })
            .await
    }

    /// Close the pool. Sessions already handed out keep their connection.
    pub async fn close(&self) {
        self.store.close().await;
        info!("Session factory closed");
    }
}
