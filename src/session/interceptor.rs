use chrono::{DateTime, SubsecRound, Utc};
use std::sync::Arc;
use tracing::debug;

use super::tracking::{ChangeState, PendingChange};
use crate::models::AuditFields;

/// Time source for audit stamps
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Stamps audit metadata on pending records right before they are flushed.
///
/// One timestamp is taken per commit so every record written by that commit
/// carries the same `modified_on`. The timestamp is truncated to
/// microseconds, the finest precision both PostgreSQL and the JSON document
/// keep.
#[derive(Clone)]
pub struct AuditInterceptor {
    clock: Arc<dyn Clock>,
}

impl Default for AuditInterceptor {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl AuditInterceptor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Commit timestamp
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    /// Apply the stamp for one change state to a set of audit fields
    ///
    /// Deleted entries are physical deletes of non-auditable records and are
    /// left alone.
    pub fn stamp_fields(
        &self,
        audit: &mut AuditFields,
        state: ChangeState,
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) {
        match state {
            ChangeState::Added => {
                audit.created_on = Some(now);
                audit.created_by = actor.map(str::to_string);
                audit.modified_on = Some(now);
                audit.modified_by = actor.map(str::to_string);
                audit.version = 1;
            }
            ChangeState::Modified => {
                audit.modified_on = Some(now);
                audit.modified_by = actor.map(str::to_string);
                audit.version += 1;
            }
            ChangeState::Deleted => {}
        }
    }

    /// Stamp every auditable entry that has not been stamped yet.
    ///
    /// Returns the number of records stamped by this call.
    pub(crate) fn stamp(
        &self,
        pending: &mut [PendingChange],
        actor: Option<&str>,
        now: DateTime<Utc>,
    ) -> usize {
        let mut stamped = 0;

        for change in pending.iter_mut().filter(|change| !change.stamped) {
            let state = change.state;
            if let Some(audit) = change.record.tracked_audit_mut() {
                self.stamp_fields(audit, state, actor, now);
                stamped += 1;
            }
            change.stamped = true;
        }

        debug!("Stamped audit fields on {} record(s)", stamped);
        stamped
    }
}
