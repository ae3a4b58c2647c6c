#![allow(dead_code)]

use async_trait::async_trait;
use audit_context::backend::database::{
    ConnectionOptions, PostgresProvider, ProviderSettings, RetryPolicy, RowChange, RowFilter,
    SqliteProvider,
};
use audit_context::backend::{
    DatabaseProvider, DatabaseType, RecordStore, StoreConnection, StoreTransaction,
};
use audit_context::error::{AppError, AppResult};
use audit_context::models::{AuditFields, Record};
use audit_context::session::{
    Clock, CommitObserver, SessionFactory, StaticConnectionResolver,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use testcontainers_modules::postgres::Postgres;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TestDatabaseType {
    Sqlite,
    Postgres,
}

/// Auditable record used across the integration tests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(flatten)]
    pub audit: AuditFields,
}

impl Note {
    pub fn new(title: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            body: None,
            audit: AuditFields::default(),
        }
    }
}

impl Record for Note {
    const KIND: &'static str = "notes";

    fn id(&self) -> Uuid {
        self.id
    }

    fn audit(&self) -> Option<&AuditFields> {
        Some(&self.audit)
    }

    fn audit_mut(&mut self) -> Option<&mut AuditFields> {
        Some(&mut self.audit)
    }
}

/// Record kind without the audit capability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
}

impl Tag {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
        }
    }
}

impl Record for Tag {
    const KIND: &'static str = "tags";

    fn id(&self) -> Uuid {
        self.id
    }
}

/// Observer that counts notifications
#[derive(Debug, Default)]
pub struct CountingObserver {
    count: AtomicUsize,
}

impl CountingObserver {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl CommitObserver for CountingObserver {
    fn on_saved(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Clock the test moves by hand
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()),
        }
    }

    pub fn current(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    pub fn advance(&self, seconds: i64) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap();
        *now += ChronoDuration::seconds(seconds);
        *now
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.current()
    }
}

/// Failures injected between the session and the real store
#[derive(Debug, Default)]
pub struct Faults {
    /// Upcoming `acquire` calls that fail with a transient error
    pub acquire_failures: AtomicU32,
    /// Upcoming `flush` calls that fail with a transient error
    pub flush_failures: AtomicU32,
    /// Make every flush wait forever before it opens a transaction
    pub hang_flush: AtomicBool,
    /// Make every flush wait forever once its first change is applied
    pub hang_mid_transaction: AtomicBool,
    /// Upcoming commits that succeed but report a transient error
    pub lost_acknowledgements: AtomicU32,
    pub flush_attempts: AtomicU32,
}

impl Faults {
    pub fn fail_next_flushes(&self, count: u32) {
        self.flush_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_acquires(&self, count: u32) {
        self.acquire_failures.store(count, Ordering::SeqCst);
    }

    pub fn flush_attempts(&self) -> u32 {
        self.flush_attempts.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Provider wrapper that injects `Faults` into the stores it opens
pub struct FaultyProvider {
    inner: Arc<dyn DatabaseProvider>,
    faults: Arc<Faults>,
}

#[async_trait]
impl DatabaseProvider for FaultyProvider {
    fn database_type(&self) -> DatabaseType {
        self.inner.database_type()
    }

    fn apply_options(
        &self,
        connection_url: &str,
        sensitive_data_logging: bool,
    ) -> AppResult<ConnectionOptions> {
        self.inner.apply_options(connection_url, sensitive_data_logging)
    }

    async fn open_store(&self, options: &ConnectionOptions) -> AppResult<Arc<dyn RecordStore>> {
        let inner = self.inner.open_store(options).await?;
        Ok(Arc::new(FaultyStore {
            inner,
            faults: self.faults.clone(),
        }))
    }
}

struct FaultyStore {
    inner: Arc<dyn RecordStore>,
    faults: Arc<Faults>,
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn acquire(&self) -> AppResult<Box<dyn StoreConnection>> {
        if Faults::take(&self.faults.acquire_failures) {
            return Err(AppError::Transient("injected: connection refused".to_string()));
        }
        let inner = self.inner.acquire().await?;
        Ok(Box::new(FaultyConnection {
            inner,
            faults: self.faults.clone(),
        }))
    }

    async fn ensure_table(&self, kind: &str) -> AppResult<()> {
        self.inner.ensure_table(kind).await
    }

    async fn health_check(&self) -> AppResult<()> {
        self.inner.health_check().await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

struct FaultyConnection {
    inner: Box<dyn StoreConnection>,
    faults: Arc<Faults>,
}

#[async_trait]
impl StoreConnection for FaultyConnection {
    async fn find(&mut self, kind: &str, id: Uuid) -> AppResult<Option<Value>> {
        self.inner.find(kind, id).await
    }

    async fn query(&mut self, kind: &str, filter: &RowFilter) -> AppResult<Vec<Value>> {
        self.inner.query(kind, filter).await
    }

    async fn begin<'c>(&'c mut self) -> AppResult<Box<dyn StoreTransaction + 'c>> {
        let faults = self.faults.clone();
        let inner = self.inner.begin().await?;
        Ok(Box::new(FaultyTransaction {
            inner,
            faults,
            applied: 0,
        }))
    }

    async fn flush(&mut self, changes: &[RowChange]) -> AppResult<()> {
        self.faults.flush_attempts.fetch_add(1, Ordering::SeqCst);
        if self.faults.hang_flush.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if Faults::take(&self.faults.flush_failures) {
            return Err(AppError::Transient("injected: connection reset".to_string()));
        }

        let mut tx = self.begin().await?;
        for change in changes {
            tx.apply(change).await?;
        }
        tx.commit().await
    }
}

struct FaultyTransaction<'c> {
    inner: Box<dyn StoreTransaction + 'c>,
    faults: Arc<Faults>,
    applied: usize,
}

#[async_trait]
impl<'c> StoreTransaction for FaultyTransaction<'c> {
    async fn apply(&mut self, change: &RowChange) -> AppResult<()> {
        self.inner.apply(change).await?;
        self.applied += 1;
        if self.applied == 1 && self.faults.hang_mid_transaction.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn commit(&mut self) -> AppResult<()> {
        self.inner.commit().await?;
        if Faults::take(&self.faults.lost_acknowledgements) {
            return Err(AppError::Transient("injected: connection reset after commit".to_string()));
        }
        Ok(())
    }
}

/// Knobs for `setup_test_database`
#[derive(Debug, Clone)]
pub struct TestOptions {
    pub notify_on_empty_commit: bool,
    pub max_retries: u32,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            notify_on_empty_commit: false,
            max_retries: 3,
        }
    }
}

pub struct TestDatabase {
    pub database_type: TestDatabaseType,
    pub factory: SessionFactory,
    pub observer: Arc<CountingObserver>,
    pub clock: Arc<ManualClock>,
    pub faults: Arc<Faults>,
    _dir: Option<TempDir>,
    _postgres_container: Option<ContainerAsync<Postgres>>,
}

fn fast_settings(max_retries: u32) -> ProviderSettings {
    ProviderSettings {
        retry: RetryPolicy::new(
            max_retries,
            Duration::from_millis(1),
            Duration::from_millis(5),
        ),
        ..ProviderSettings::default()
    }
}

/// On-disk SQLite database in a temporary directory, tables for `Note` and `Tag`
pub async fn setup_test_database() -> Result<TestDatabase, Box<dyn std::error::Error>> {
    setup_test_database_with(TestDatabaseType::Sqlite, TestOptions::default()).await
}

pub async fn setup_test_database_with(
    db_type: TestDatabaseType,
    options: TestOptions,
) -> Result<TestDatabase, Box<dyn std::error::Error>> {
    let settings = fast_settings(options.max_retries);

    let (provider, address, dir, container): (
        Arc<dyn DatabaseProvider>,
        String,
        Option<TempDir>,
        Option<ContainerAsync<Postgres>>,
    ) = match db_type {
        TestDatabaseType::Sqlite => {
            let dir = tempfile::tempdir()?;
            let address = format!("sqlite:{}", dir.path().join("audit.db").display());
            (
                Arc::new(SqliteProvider::new(settings)),
                address,
                Some(dir),
                None,
            )
        }
        TestDatabaseType::Postgres => {
            let container = Postgres::default().start().await?;
            let host = container.get_host().await?;
            let port = container.get_host_port_ipv4(5432).await?;
            let address = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
            (
                Arc::new(PostgresProvider::new(settings)),
                address,
                None,
                Some(container),
            )
        }
    };

    let faults = Arc::new(Faults::default());
    let observer = Arc::new(CountingObserver::default());
    let clock = Arc::new(ManualClock::new());

    let provider = Arc::new(FaultyProvider {
        inner: provider,
        faults: faults.clone(),
    });

    let factory = SessionFactory::builder(Arc::new(StaticConnectionResolver::new(address)), provider)
        .observer(observer.clone())
        .clock(clock.clone())
        .notify_on_empty_commit(options.notify_on_empty_commit)
        .build()
        .await?;

    factory.ensure_record_set::<Note>().await?;
    factory.ensure_record_set::<Tag>().await?;

    Ok(TestDatabase {
        database_type: db_type,
        factory,
        observer,
        clock,
        faults,
        _dir: dir,
        _postgres_container: container,
    })
}
