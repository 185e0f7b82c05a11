/*!
SQLite-backed live record store.
*/

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::table::{self, CREATE_TABLE};
use super::{InsertOutcome, RecordFilter, RecordStore};
use crate::record::{format_timestamp, parse_timestamp};
use crate::{AuditRecord, LifecycleError, Result};

/// Live record store kept in a SQLite database.
///
/// The `audit_logs` table has the same layout as backup snapshots. Timestamps
/// are fixed-width RFC 3339 text, so `timestamp < ?` compares chronologically.
/// Each predicate operation is a single SQL statement.
#[derive(Debug)]
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open (or create) a store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| LifecycleError::filesystem(parent, e))?;
        }
        let conn = Connection::open(path).map_err(|e| {
            LifecycleError::storage(format!("Failed to open {}: {e}", path.display()))
        })?;
        Self::from_connection(conn)
    }

    /// A private, non-persistent store
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute(CREATE_TABLE, [])?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs (timestamp)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LifecycleError::storage("sqlite connection lock poisoned"))
    }
}

impl RecordStore for SqliteRecordStore {
    fn select_where(&self, filter: &RecordFilter) -> Result<Vec<AuditRecord>> {
        let conn = self.lock()?;
        let (clause, cutoff) = match filter {
            RecordFilter::All => ("", None),
            RecordFilter::OlderThan(cutoff) => {
                (" WHERE timestamp < ?1", Some(format_timestamp(cutoff)))
            }
        };
        let sql = table::select_sql(&format!("{clause} ORDER BY timestamp ASC, id ASC"));
        let mut stmt = conn.prepare(&sql)?;

        let decode = |row: &rusqlite::Row<'_>| -> rusqlite::Result<std::result::Result<AuditRecord, String>> {
            Ok(table::decode_row(row))
        };
        let rows = match &cutoff {
            Some(cutoff) => stmt.query_map(params![cutoff], decode)?.collect::<Vec<_>>(),
            None => stmt.query_map([], decode)?.collect::<Vec<_>>(),
        };

        rows.into_iter()
            .map(|row| -> Result<AuditRecord> {
                row?.map_err(|reason| LifecycleError::storage(format!("Corrupt live row: {reason}")))
            })
            .collect()
    }

    fn delete_where(&self, filter: &RecordFilter) -> Result<u64> {
        let conn = self.lock()?;
        let deleted = match filter {
            RecordFilter::All => conn.execute("DELETE FROM audit_logs", [])?,
            RecordFilter::OlderThan(cutoff) => conn.execute(
                "DELETE FROM audit_logs WHERE timestamp < ?1",
                params![format_timestamp(cutoff)],
            )?,
        };
        Ok(deleted as u64)
    }

    fn insert(&self, record: &AuditRecord) -> Result<InsertOutcome> {
        let conn = self.lock()?;
        let changed = table::insert_record(&conn, &table::insert_sql(true), record)?;
        Ok(if changed == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    fn count_all(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM audit_logs", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn timestamp_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let conn = self.lock()?;
        let bounds: Option<(Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT MIN(timestamp), MAX(timestamp) FROM audit_logs",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match bounds {
            Some((Some(oldest), Some(newest))) => {
                Ok(Some((parse_timestamp(&oldest)?, parse_timestamp(&newest)?)))
            }
            _ => Ok(None),
        }
    }
}
