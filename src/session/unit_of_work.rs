use chrono::{DateTime, Utc};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::interceptor::AuditInterceptor;
use super::observer::CommitObserver;
use super::tracking::{ChangeState, PendingChange, TrackedRecord};
use crate::backend::database::{RetryPolicy, RowChange, RowFilter};
use crate::backend::{RecordStore, StoreConnection};
use crate::error::{AppError, AppResult};
use crate::models::Record;

/// Lifecycle of a persistence session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting changes
    Open,
    /// A commit is in flight
    Committing,
    /// The last commit succeeded; new changes reopen the session
    Committed,
    /// A commit failed and was rolled back; the session is unusable
    Failed,
    Closed,
}

/// Row counts written by one commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    /// Records that received audit stamps
    pub stamped: usize,
}

impl CommitSummary {
    fn from_changes(changes: &[RowChange], stamped: usize) -> Self {
        let mut summary = CommitSummary {
            stamped,
            ..CommitSummary::default()
        };
        for change in changes {
            match change {
                RowChange::Insert { .. } => summary.added += 1,
                RowChange::Update { .. } => summary.modified += 1,
                RowChange::Delete { .. } => summary.deleted += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.added + self.modified + self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Per-session settings handed over by the factory
#[derive(Clone)]
pub(crate) struct SessionSettings {
    pub interceptor: Arc<AuditInterceptor>,
    pub observer: Arc<dyn CommitObserver>,
    pub retry: RetryPolicy,
    pub notify_on_empty_commit: bool,
    pub sensitive_data_logging: bool,
}

/// A unit of work over one pooled connection.
///
/// Changes are tracked in memory through [`RecordSet`]s and written in a
/// single transaction by [`commit`](Self::commit). Before the write, the audit
/// interceptor stamps every pending auditable record; after the database
/// acknowledges the commit, the observer is notified once.
///
/// Dropping the session returns its connection to the pool. Dropping an
/// in-flight `commit` future rolls the transaction back; the session then
/// reports itself as failed on next use.
pub struct PersistenceSession {
    conn: Option<Box<dyn StoreConnection>>,
    store: Arc<dyn RecordStore>,
    settings: SessionSettings,
    actor: Option<String>,
    pending: Vec<PendingChange>,
    state: SessionState,
}

impl PersistenceSession {
    pub(crate) fn new(
        conn: Box<dyn StoreConnection>,
        store: Arc<dyn RecordStore>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            conn: Some(conn),
            store,
            settings,
            actor: None,
            pending: Vec::new(),
            state: SessionState::Open,
        }
    }

    /// Scope the session to an actor; stamped into `created_by` / `modified_by`
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drop every pending change; returns how many were dropped
    pub fn discard_changes(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }

    /// Typed access to one record kind
    pub fn records<T: Record>(&mut self) -> RecordSet<'_, T> {
        RecordSet {
            session: self,
            _marker: PhantomData,
        }
    }

    /// Release the connection. Pending changes are discarded.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if !self.pending.is_empty() {
            debug!(
                "Closing session with {} uncommitted change(s)",
                self.pending.len()
            );
        }
        self.pending.clear();
        self.conn = None;
        self.state = SessionState::Closed;
    }

    /// Stamp, flush in one transaction and notify the observer.
    ///
    /// Transient failures are retried per the connection's retry policy on a
    /// fresh connection. Any other failure rolls the transaction back, marks
    /// the session as failed and discards the pending changes; the observer
    /// is not called.
    ///
    /// # Lost acknowledgements
    ///
    /// If the database commits but the connection drops before the
    /// acknowledgement arrives, the failure looks transient and the same
    /// changes are flushed again. That retry then fails with
    /// `AppError::Concurrency` (the version already moved) or `AppError::Commit`
    /// (the inserted key already exists), although the first attempt is
    /// durable and `on_saved` was never called. Callers that see either error
    /// after a retry was logged should reload the affected records before
    /// treating the work as lost.
    pub async fn commit(&mut self) -> AppResult<CommitSummary> {
        self.ensure_usable()?;

        if self.pending.is_empty() {
            debug!("Commit with no pending changes");
            self.state = SessionState::Committed;
            if self.settings.notify_on_empty_commit {
                self.settings.observer.on_saved();
            }
            return Ok(CommitSummary::default());
        }

        self.state = SessionState::Committing;

        let interceptor = self.settings.interceptor.clone();
        let now = interceptor.now();
        let stamped = interceptor.stamp(&mut self.pending, self.actor.as_deref(), now);

        let changes: AppResult<Vec<RowChange>> = self
            .pending
            .iter()
            .map(PendingChange::to_row_change)
            .collect();
        let changes = match changes {
            Ok(changes) => changes,
            Err(e) => return Err(self.fail(e.into_commit_error())),
        };

        if self.settings.sensitive_data_logging {
            for change in &changes {
                debug!(actor = ?self.actor, "Pending change: {:?}", change);
            }
        }

        let mut retries = 0;
        loop {
            match self.flush_once(&changes).await {
                Ok(()) => break,
                Err(e) if self.settings.retry.should_retry(&e, retries) => {
                    retries += 1;
                    let delay = self.settings.retry.delay_for(retries);
                    warn!(
                        "Commit hit a transient failure ({}); retry {}/{} in {}ms",
                        e,
                        retries,
                        self.settings.retry.max_retries,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let e = self.settings.retry.exhausted("Commit", e, retries);
                    return Err(self.fail(e.into_commit_error()));
                }
            }
        }

        let summary = CommitSummary::from_changes(&changes, stamped);
        self.pending.clear();
        self.state = SessionState::Committed;

        info!(
            "Committed {} added, {} modified, {} deleted",
            summary.added, summary.modified, summary.deleted
        );
        self.settings.observer.on_saved();

        Ok(summary)
    }

    async fn flush_once(&mut self, changes: &[RowChange]) -> AppResult<()> {
        let result = self.connection().await?.flush(changes).await;
        if matches!(&result, Err(e) if e.is_transient()) {
            // Reconnect before the next attempt
            self.conn = None;
        }
        result
    }

    /// The session's connection, reacquired if a transient failure dropped it
    async fn connection(&mut self) -> AppResult<&mut Box<dyn StoreConnection>> {
        if self.conn.is_none() {
            let conn = self.store.acquire().await?;
            self.conn = Some(conn);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| AppError::SessionState("session has no connection".to_string()))
    }

    fn fail(&mut self, error: AppError) -> AppError {
        warn!("Commit failed, discarding {} change(s): {}", self.pending.len(), error);
        self.pending.clear();
        self.conn = None;
        self.state = SessionState::Failed;
        error
    }

    fn ensure_usable(&mut self) -> AppResult<()> {
        match self.state {
            SessionState::Open | SessionState::Committed => Ok(()),
            SessionState::Committing => {
                // A dropped commit future leaves the state behind
                self.fail(AppError::SessionState(
                    "previous commit was interrupted and rolled back".to_string(),
                ));
                Err(AppError::SessionState(
                    "session failed: previous commit was interrupted".to_string(),
                ))
            }
            SessionState::Failed => Err(AppError::SessionState(
                "session failed during a previous commit".to_string(),
            )),
            SessionState::Closed => Err(AppError::SessionState("session is closed".to_string())),
        }
    }

    fn position(&self, kind: &str, id: Uuid) -> Option<usize> {
        self.pending.iter().position(|change| change.matches(kind, id))
    }

    fn track(&mut self, change: PendingChange) {
        self.pending.push(change);
        self.state = SessionState::Open;
    }

    fn track_added(&mut self, record: Box<dyn TrackedRecord>) -> AppResult<()> {
        self.ensure_usable()?;
        let (kind, id) = (record.record_kind(), record.record_id());

        match self.position(kind, id) {
            Some(index) => {
                let existing = &mut self.pending[index];
                if existing.state == ChangeState::Deleted {
                    // The row still exists until the delete is flushed
                    *existing = PendingChange::new(ChangeState::Modified, record);
                } else {
                    existing.record = record;
                }
                self.state = SessionState::Open;
            }
            None => self.track(PendingChange::new(ChangeState::Added, record)),
        }
        Ok(())
    }

    fn track_modified(&mut self, record: Box<dyn TrackedRecord>) -> AppResult<()> {
        self.ensure_usable()?;
        let (kind, id) = (record.record_kind(), record.record_id());

        match self.position(kind, id) {
            Some(index) => {
                let existing = &mut self.pending[index];
                match existing.state {
                    ChangeState::Added | ChangeState::Modified => existing.record = record,
                    ChangeState::Deleted => {
                        *existing = PendingChange::new(ChangeState::Modified, record)
                    }
                }
                self.state = SessionState::Open;
            }
            None => self.track(PendingChange::new(ChangeState::Modified, record)),
        }
        Ok(())
    }

    fn track_removed(&mut self, mut record: Box<dyn TrackedRecord>) -> AppResult<()> {
        self.ensure_usable()?;
        let (kind, id) = (record.record_kind(), record.record_id());

        let auditable = match record.tracked_audit_mut() {
            Some(audit) => {
                audit.soft_delete();
                true
            }
            None => false,
        };

        match self.position(kind, id) {
            Some(index) if self.pending[index].state == ChangeState::Added => {
                // Never written, nothing to delete
                self.pending.remove(index);
            }
            Some(index) => {
                let existing = &mut self.pending[index];
                if auditable {
                    existing.record = record;
                    existing.state = ChangeState::Modified;
                } else {
                    *existing = PendingChange::new(ChangeState::Deleted, record);
                }
                self.state = SessionState::Open;
            }
            None if auditable => self.track(PendingChange::new(ChangeState::Modified, record)),
            None => self.track(PendingChange::new(ChangeState::Deleted, record)),
        }
        Ok(())
    }

    async fn fetch_one(&mut self, kind: &'static str, id: Uuid) -> AppResult<Option<Value>> {
        self.ensure_usable()?;
        let retry = self.settings.retry.clone();
        let mut retries = 0;
        loop {
            let result = self.connection().await?.find(kind, id).await;
            match result {
                Ok(value) => return Ok(value),
                Err(e) if retry.should_retry(&e, retries) => {
                    self.conn = None;
                    retries += 1;
                    tokio::time::sleep(retry.delay_for(retries)).await;
                }
                Err(e) => return Err(retry.exhausted("Record lookup", e, retries)),
            }
        }
    }

    async fn fetch_many(&mut self, kind: &'static str, filter: &RowFilter) -> AppResult<Vec<Value>> {
        self.ensure_usable()?;
        let retry = self.settings.retry.clone();
        let mut retries = 0;
        loop {
            let result = self.connection().await?.query(kind, filter).await;
            match result {
                Ok(values) => return Ok(values),
                Err(e) if retry.should_retry(&e, retries) => {
                    self.conn = None;
                    retries += 1;
                    tokio::time::sleep(retry.delay_for(retries)).await;
                }
                Err(e) => return Err(retry.exhausted("Record query", e, retries)),
            }
        }
    }
}

impl Drop for PersistenceSession {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            debug!(
                "Session dropped with {} uncommitted change(s)",
                self.pending.len()
            );
        }
    }
}

/// Tracked access to the records of one kind within a session
pub struct RecordSet<'a, T: Record> {
    session: &'a mut PersistenceSession,
    _marker: PhantomData<T>,
}

impl<'a, T: Record> RecordSet<'a, T> {
    /// Track a new record; it is inserted on commit
    pub fn add(&mut self, record: T) -> AppResult<()> {
        self.session.track_added(Box::new(record))
    }

    /// Track changes to a loaded record
    ///
    /// For auditable records the update only succeeds if the row still has
    /// the version the record was loaded with.
    pub fn update(&mut self, record: T) -> AppResult<()> {
        self.session.track_modified(Box::new(record))
    }

    /// Remove a record.
    ///
    /// Auditable records are soft deleted (`is_deleted = true`, written as a
    /// modification). Other records are deleted from the table.
    pub fn remove(&mut self, record: T) -> AppResult<()> {
        self.session.track_removed(Box::new(record))
    }

    /// Look a record up by key, pending changes first.
    ///
    /// Soft-deleted records are returned; a pending physical delete hides the
    /// record.
    pub async fn find(&mut self, id: Uuid) -> AppResult<Option<T>> {
        if let Some(index) = self.session.position(T::KIND, id) {
            let change = &self.session.pending[index];
            if change.state == ChangeState::Deleted {
                return Ok(None);
            }
            if let Some(record) = change.record.as_any().downcast_ref::<T>() {
                return Ok(Some(record.clone()));
            }
        }

        match self.session.fetch_one(T::KIND, id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Stored records that are not soft deleted
    pub async fn active(&mut self) -> AppResult<Vec<T>> {
        self.query(&RowFilter::active()).await
    }

    /// Every stored record, soft-deleted ones included
    pub async fn all(&mut self) -> AppResult<Vec<T>> {
        self.query(&RowFilter::all()).await
    }

    /// Stored records modified strictly after `since`
    pub async fn modified_since(&mut self, since: DateTime<Utc>) -> AppResult<Vec<T>> {
        self.query(&RowFilter::modified_since(since)).await
    }

    async fn query(&mut self, filter: &RowFilter) -> AppResult<Vec<T>> {
        let values = self.session.fetch_many(T::KIND, filter).await?;
        values
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(AppError::from))
            .collect()
    }
}
