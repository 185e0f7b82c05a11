/*!
Live record storage.

This module defines the record store abstraction (port) the lifecycle stages
run against, and the concrete adapters: an in-memory store and a SQLite
store. The stages never see SQL or locks; they only use the predicates below.
*/

pub mod memory;
pub mod sqlite;
pub(crate) mod table;

use chrono::{DateTime, Utc};

use crate::{AuditRecord, Result};

pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;

/// Predicate over live records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFilter {
    /// Every live record
    All,
    /// Records with `timestamp < cutoff` (strictly less than)
    OlderThan(DateTime<Utc>),
}

impl RecordFilter {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        match self {
            RecordFilter::All => true,
            RecordFilter::OlderThan(cutoff) => record.timestamp() < *cutoff,
        }
    }
}

/// What happened to a single insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same identity is already live; nothing was written
    Duplicate,
}

/// Live record store used by every lifecycle stage.
///
/// Implementations must execute `select_where` and `delete_where` each as a
/// single atomic statement, so concurrent archive and retention runs never
/// delete rows based on a stale selection. Record identity is unique: a
/// second insert of the same id reports [`InsertOutcome::Duplicate`].
#[cfg_attr(test, mockall::automock)]
pub trait RecordStore: Send + Sync {
    /// Records matching `filter`, ordered by timestamp ascending (ties by id)
    fn select_where(&self, filter: &RecordFilter) -> Result<Vec<AuditRecord>>;

    /// Delete every record matching `filter`, returning the number removed
    fn delete_where(&self, filter: &RecordFilter) -> Result<u64>;

    /// Insert a record, preserving its identity
    fn insert(&self, record: &AuditRecord) -> Result<InsertOutcome>;

    /// Number of live records
    fn count_all(&self) -> Result<u64>;

    /// Oldest and newest live timestamps, or `None` for an empty store
    fn timestamp_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>>;
}

impl<S: RecordStore + ?Sized> RecordStore for std::sync::Arc<S> {
    fn select_where(&self, filter: &RecordFilter) -> Result<Vec<AuditRecord>> {
        (**self).select_where(filter)
    }

    fn delete_where(&self, filter: &RecordFilter) -> Result<u64> {
        (**self).delete_where(filter)
    }

    fn insert(&self, record: &AuditRecord) -> Result<InsertOutcome> {
        (**self).insert(record)
    }

    fn count_all(&self) -> Result<u64> {
        (**self).count_all()
    }

    fn timestamp_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        (**self).timestamp_range()
    }
}
