use serde_json::Value;
use std::any::Any;
use uuid::Uuid;

use crate::backend::database::{RecordRow, RowChange};
use crate::error::AppResult;
use crate::models::{AuditFields, Record};

/// What a pending entry will do to its row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
    Added,
    Modified,
    /// Physical delete; only non-auditable records end up here
    Deleted,
}

/// Type-erased view of a tracked record
///
/// Method names are distinct from `Record` so both traits can be in scope.
pub(crate) trait TrackedRecord: Send + Sync {
    fn record_kind(&self) -> &'static str;
    fn record_id(&self) -> Uuid;
    fn tracked_audit(&self) -> Option<&AuditFields>;
    fn tracked_audit_mut(&mut self) -> Option<&mut AuditFields>;
    fn to_value(&self) -> AppResult<Value>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Record> TrackedRecord for T {
    fn record_kind(&self) -> &'static str {
        T::KIND
    }

    fn record_id(&self) -> Uuid {
        Record::id(self)
    }

    fn tracked_audit(&self) -> Option<&AuditFields> {
        Record::audit(self)
    }

    fn tracked_audit_mut(&mut self) -> Option<&mut AuditFields> {
        Record::audit_mut(self)
    }

    fn to_value(&self) -> AppResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One entry of the unit of work
pub(crate) struct PendingChange {
    pub state: ChangeState,
    pub record: Box<dyn TrackedRecord>,
    /// Version the row must still have when the update runs
    pub expected_version: Option<i64>,
    /// Set once the audit interceptor has handled this entry
    pub stamped: bool,
}

impl PendingChange {
    pub fn new(state: ChangeState, record: Box<dyn TrackedRecord>) -> Self {
        let expected_version = match state {
            ChangeState::Modified => record.tracked_audit().map(|audit| audit.version),
            _ => None,
        };

        Self {
            state,
            record,
            expected_version,
            stamped: false,
        }
    }

    pub fn matches(&self, kind: &str, id: Uuid) -> bool {
        self.record.record_kind() == kind && self.record.record_id() == id
    }

    pub fn to_row_change(&self) -> AppResult<RowChange> {
        let kind = self.record.record_kind();
        let id = self.record.record_id();

        let change = match self.state {
            ChangeState::Added => RowChange::Insert {
                kind,
                row: RecordRow::new(id, self.record.to_value()?, self.record.tracked_audit()),
            },
            ChangeState::Modified => RowChange::Update {
                kind,
                row: RecordRow::new(id, self.record.to_value()?, self.record.tracked_audit()),
                expected_version: self.expected_version,
            },
            ChangeState::Deleted => RowChange::Delete { kind, id },
        };

        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ticket {
        id: Uuid,
        title: String,
        #[serde(flatten)]
        audit: AuditFields,
    }

    impl Record for Ticket {
        const KIND: &'static str = "tickets";

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

    fn ticket(version: i64) -> Ticket {
        Ticket {
            id: Uuid::new_v4(),
            title: "Replace fan".to_string(),
            audit: AuditFields {
                version,
                ..AuditFields::default()
            },
        }
    }

    #[test]
    fn test_modified_entry_remembers_loaded_version() {
        let change = PendingChange::new(ChangeState::Modified, Box::new(ticket(3)));
        assert_eq!(change.expected_version, Some(3));

        let change = PendingChange::new(ChangeState::Added, Box::new(ticket(0)));
        assert_eq!(change.expected_version, None);
    }

    #[test]
    fn test_to_row_change_mirrors_audit_columns() {
        let mut record = ticket(2);
        record.audit.is_deleted = true;
        let id = record.id;

        let change = PendingChange::new(ChangeState::Modified, Box::new(record))
            .to_row_change()
            .unwrap();

        match change {
            RowChange::Update {
                kind,
                row,
                expected_version,
            } => {
                assert_eq!(kind, "tickets");
                assert_eq!(row.id, id);
                assert!(row.is_deleted);
                assert_eq!(row.data["title"], "Replace fan");
                assert_eq!(row.data["isDeleted"], true);
                assert_eq!(expected_version, Some(2));
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_matches_and_downcast() {
        let record = ticket(0);
        let id = record.id;
        let change = PendingChange::new(ChangeState::Added, Box::new(record));

        assert!(change.matches("tickets", id));
        assert!(!change.matches("notes", id));
        assert!(!change.matches("tickets", Uuid::new_v4()));
        assert!(change.record.as_any().downcast_ref::<Ticket>().is_some());
    }
}
