/*!
In-memory record store.
*/

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{InsertOutcome, RecordFilter, RecordStore};
use crate::{AuditRecord, LifecycleError, Result};

/// Memory-based record store
///
/// Keeps records in a `HashMap` keyed by identity behind one mutex, so every
/// predicate operation is atomic. Useful for tests, demos and embedding the
/// lifecycle engine without a database.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<Uuid, AuditRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `records` (later duplicates are ignored)
    pub fn with_records<I: IntoIterator<Item = AuditRecord>>(records: I) -> Self {
        let mut map = HashMap::new();
        for record in records {
            map.entry(record.id()).or_insert(record);
        }
        Self {
            records: Mutex::new(map),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, AuditRecord>>> {
        self.records
            .lock()
            .map_err(|_| LifecycleError::storage("memory record store lock poisoned"))
    }
}

impl RecordStore for MemoryRecordStore {
    fn select_where(&self, filter: &RecordFilter) -> Result<Vec<AuditRecord>> {
        let records = self.lock()?;
        let mut selected: Vec<AuditRecord> = records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        selected.sort_by(|a, b| {
            a.timestamp()
                .cmp(&b.timestamp())
                .then_with(|| a.id().cmp(&b.id()))
        });
        Ok(selected)
    }

    fn delete_where(&self, filter: &RecordFilter) -> Result<u64> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, record| !filter.matches(record));
        Ok((before - records.len()) as u64)
    }

    fn insert(&self, record: &AuditRecord) -> Result<InsertOutcome> {
        let mut records = self.lock()?;
        if records.contains_key(&record.id()) {
            return Ok(InsertOutcome::Duplicate);
        }
        records.insert(record.id(), record.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn count_all(&self) -> Result<u64> {
        Ok(self.lock()?.len() as u64)
    }

    fn timestamp_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let records = self.lock()?;
        let oldest = records.values().map(AuditRecord::timestamp).min();
        let newest = records.values().map(AuditRecord::timestamp).max();
        Ok(oldest.zip(newest))
    }
}
