use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit metadata carried by records that opt into auditing.
///
/// `created_*`, `modified_*` and `version` are written by the session's audit
/// interceptor at commit time. `synchronized_on` belongs to external sync
/// bookkeeping and is persisted exactly as the caller sets it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFields {
    pub created_on: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub modified_on: Option<DateTime<Utc>>,
    pub modified_by: Option<String>,
    pub synchronized_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub is_deleted: bool,
}

impl AuditFields {
    /// Flag the record as deleted. The row itself is kept.
    pub fn soft_delete(&mut self) {
        self.is_deleted = true;
    }

    /// True until the record has gone through its first commit
    pub fn is_new(&self) -> bool {
        self.created_on.is_none()
    }
}

/// A persisted entity kind.
///
/// Every record kind lives in its own table named after `KIND`. The audit
/// capability is optional: kinds that return `None` from `audit_mut` are
/// written as-is, without stamping, version checks or soft delete.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Table name for this kind; must be a plain SQL identifier
    const KIND: &'static str;

    fn id(&self) -> Uuid;

    fn audit(&self) -> Option<&AuditFields> {
        None
    }

    fn audit_mut(&mut self) -> Option<&mut AuditFields> {
        None
    }
}
