use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::AuditFields;

/// One record prepared for storage
///
/// `data` is the full JSON document of the record. The audit columns mirror
/// the document so filtering and the version check can run in SQL; records
/// without the audit capability store version 0 and NULL timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRow {
    pub id: Uuid,
    pub data: Value,
    pub version: i64,
    pub is_deleted: bool,
    pub created_on: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub modified_on: Option<DateTime<Utc>>,
    pub modified_by: Option<String>,
    pub synchronized_on: Option<DateTime<Utc>>,
}

impl RecordRow {
    pub fn new(id: Uuid, data: Value, audit: Option<&AuditFields>) -> Self {
        match audit {
            Some(audit) => Self {
                id,
                data,
                version: audit.version,
                is_deleted: audit.is_deleted,
                created_on: audit.created_on,
                created_by: audit.created_by.clone(),
                modified_on: audit.modified_on,
                modified_by: audit.modified_by.clone(),
                synchronized_on: audit.synchronized_on,
            },
            None => Self {
                id,
                data,
                version: 0,
                is_deleted: false,
                created_on: None,
                created_by: None,
                modified_on: None,
                modified_by: None,
                synchronized_on: None,
            },
        }
    }
}

/// Copy the stored creation stamp into a record document.
///
/// The insert writes `created_on` / `created_by` once and updates never touch
/// those columns, so they win over whatever the last written document held.
/// Rows without a creation stamp (records without the audit capability) are
/// returned as stored.
pub fn restore_creation_stamp(
    data: &mut Value,
    created_on: Option<DateTime<Utc>>,
    created_by: Option<String>,
) {
    let Some(created_on) = created_on else {
        return;
    };
    if let Value::Object(document) = data {
        document.insert("createdOn".to_string(), json!(created_on));
        document.insert(
            "createdBy".to_string(),
            created_by.map(Value::String).unwrap_or(Value::Null),
        );
    }
}

/// A write to apply inside the flush transaction
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Insert {
        kind: &'static str,
        row: RecordRow,
    },
    /// `expected_version` is the version the caller loaded; `None` skips the check
    Update {
        kind: &'static str,
        row: RecordRow,
        expected_version: Option<i64>,
    },
    /// Physical removal, only produced for records without the audit capability
    Delete { kind: &'static str, id: Uuid },
}

impl RowChange {
    pub fn kind(&self) -> &'static str {
        match self {
            RowChange::Insert { kind, .. }
            | RowChange::Update { kind, .. }
            | RowChange::Delete { kind, .. } => kind,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            RowChange::Insert { row, .. } | RowChange::Update { row, .. } => row.id,
            RowChange::Delete { id, .. } => *id,
        }
    }
}

/// Values bound into a filter's WHERE clause
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

/// Row selection for record-set queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowFilter {
    pub include_deleted: bool,
    pub modified_since: Option<DateTime<Utc>>,
}

impl RowFilter {
    /// Rows whose soft-delete flag is not set
    pub fn active() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            include_deleted: true,
            modified_since: None,
        }
    }

    pub fn modified_since(since: DateTime<Utc>) -> Self {
        Self {
            include_deleted: false,
            modified_since: Some(since),
        }
    }

    /// Build the WHERE clause for this filter
    ///
    /// `placeholder` renders the dialect's parameter marker for a 1-based
    /// index, e.g. `$1` for PostgreSQL or `?1` for SQLite. Returns an empty
    /// clause when the filter selects every row.
    pub fn to_where_clause(&self, placeholder: impl Fn(usize) -> String) -> (String, Vec<FilterValue>) {
        let mut conditions = Vec::new();
        let mut values = Vec::new();

        if !self.include_deleted {
            values.push(FilterValue::Bool(false));
            conditions.push(format!("is_deleted = {}", placeholder(values.len())));
        }
        if let Some(since) = self.modified_since {
            values.push(FilterValue::Timestamp(since));
            conditions.push(format!("modified_on > {}", placeholder(values.len())));
        }

        if conditions.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), values)
        }
    }
}
