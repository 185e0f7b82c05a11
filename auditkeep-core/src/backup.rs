/*!
Backup snapshots: full copies of the live store in standalone SQLite files,
and restore from them.

A snapshot has one `audit_logs` table whose layout matches the live SQLite
store. Restores preserve record identity, so restoring the same snapshot
twice inserts nothing the second time.
*/

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artifacts::{bytes_to_mb, file_size, sha256_file};
use crate::manager::{BACKUP_EXTENSION, BACKUP_PREFIX};
use crate::observability::{record_count, Counted, StageTimer};
use crate::storage::table::{self, CREATE_TABLE, TABLE_NAME};
use crate::storage::{InsertOutcome, RecordFilter, RecordStore};
use crate::{Clock, LifecycleError, LifecycleManager, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupResult {
    pub backup_file: PathBuf,
    pub backup_size_mb: f64,
    pub log_count: u64,
    pub timestamp: DateTime<Utc>,
    /// Hex SHA-256 of the snapshot file
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreResult {
    /// Rows inserted into the live store
    pub restored_count: u64,
    /// Rows read from the snapshot, including skipped ones
    pub total_in_backup: u64,
    /// Rows whose identity was already live
    pub duplicate_count: u64,
    /// Rows that could not be decoded
    pub corrupt_count: u64,
    pub backup_file: PathBuf,
}

/// What happened to one snapshot row during restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Restored,
    Duplicate,
    Corrupt(String),
}

impl<S, C> LifecycleManager<S, C>
where
    S: RecordStore,
    C: Clock,
{
    /// Snapshot every live record into a new backup file
    ///
    /// An empty store still produces a valid snapshot with zero rows.
    pub fn create_backup(&self) -> Result<BackupResult> {
        let timer = StageTimer::start("backup");
        let result = self.write_backup();
        timer.observe(&result);
        result
    }

    fn write_backup(&self) -> Result<BackupResult> {
        let timestamp = self.clock.now();
        let records = self.store.select_where(&RecordFilter::All)?;

        let temp_path = self.backups.temp_file(BACKUP_PREFIX)?.into_temp_path();
        {
            let mut conn = Connection::open(&temp_path)?;
            conn.execute(CREATE_TABLE, [])?;

            let tx = conn.transaction()?;
            let insert = table::insert_sql(false);
            for record in &records {
                table::insert_record(&tx, &insert, record)?;
            }
            tx.commit()?;
            conn.close().map_err(|(_, e)| LifecycleError::from(e))?;
        }

        let backup_file =
            self.backups
                .publish_path(temp_path, BACKUP_PREFIX, BACKUP_EXTENSION, timestamp)?;
        let size_bytes = file_size(&backup_file)?;
        let checksum = sha256_file(&backup_file)?;
        let log_count = records.len() as u64;

        record_count(Counted::BackupsCreated, 1);
        info!(
            backup_file = %backup_file.display(),
            log_count,
            size_bytes,
            "Created backup"
        );

        Ok(BackupResult {
            backup_file,
            backup_size_mb: bytes_to_mb(size_bytes),
            log_count,
            timestamp,
            checksum,
        })
    }

    /// Re-insert the records of a backup snapshot into the live store
    ///
    /// Rows that fail to decode are skipped and counted. Rows whose identity
    /// is already live are counted as duplicates.
    ///
    /// # Errors
    /// * `LifecycleError::BackupNotFound` - `backup_file` does not exist; the store is untouched
    /// * `LifecycleError::InvalidBackup` - the file is not a snapshot (not SQLite or no `audit_logs` table)
    /// * `LifecycleError::Storage` - the live store rejected an insert; earlier rows stay restored
    pub fn restore_from_backup<P: AsRef<Path>>(&self, backup_file: P) -> Result<RestoreResult> {
        let timer = StageTimer::start("restore");
        let result = self.restore(backup_file.as_ref());
        timer.observe(&result);
        result
    }

    fn restore(&self, backup_file: &Path) -> Result<RestoreResult> {
        if !backup_file.is_file() {
            return Err(LifecycleError::BackupNotFound(backup_file.to_path_buf()));
        }
        let conn = open_snapshot(backup_file)?;
        let invalid = |e: rusqlite::Error| {
            LifecycleError::invalid_backup(format!("{}: {e}", backup_file.display()))
        };

        let mut stmt = conn
            .prepare(&table::select_sql(" ORDER BY rowid"))
            .map_err(invalid)?;
        let mut rows = stmt.query([]).map_err(invalid)?;

        let mut result = RestoreResult {
            restored_count: 0,
            total_in_backup: 0,
            duplicate_count: 0,
            corrupt_count: 0,
            backup_file: backup_file.to_path_buf(),
        };

        while let Some(row) = rows.next().map_err(invalid)? {
            result.total_in_backup += 1;
            match self.restore_row(row)? {
                RowOutcome::Restored => result.restored_count += 1,
                RowOutcome::Duplicate => result.duplicate_count += 1,
                RowOutcome::Corrupt(reason) => {
                    warn!(
                        row = result.total_in_backup,
                        reason = %reason,
                        "Skipping corrupt backup row"
                    );
                    result.corrupt_count += 1;
                }
            }
        }

        record_count(Counted::Restored, result.restored_count);
        record_count(Counted::CorruptRows, result.corrupt_count);
        info!(
            backup_file = %backup_file.display(),
            restored = result.restored_count,
            total = result.total_in_backup,
            duplicates = result.duplicate_count,
            corrupt = result.corrupt_count,
            "Restored from backup"
        );
        Ok(result)
    }

    /// Decode and insert one row; only live-store failures are errors
    fn restore_row(&self, row: &rusqlite::Row<'_>) -> Result<RowOutcome> {
        let record = match table::decode_row(row) {
            Ok(record) => record,
            Err(reason) => return Ok(RowOutcome::Corrupt(reason)),
        };

        Ok(match self.store.insert(&record)? {
            InsertOutcome::Inserted => RowOutcome::Restored,
            InsertOutcome::Duplicate => {
                debug!(id = %record.id(), "Record already live, skipping");
                RowOutcome::Duplicate
            }
        })
    }
}

/// Open a snapshot read-only and check it holds an `audit_logs` table
fn open_snapshot(path: &Path) -> Result<Connection> {
    let invalid = |e: rusqlite::Error| {
        LifecycleError::invalid_backup(format!("{}: {e}", path.display()))
    };

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(invalid)?;

    // A non-SQLite file fails here with "file is not a database"
    let tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [TABLE_NAME],
            |row| row.get(0),
        )
        .map_err(invalid)?;
    if tables == 0 {
        return Err(LifecycleError::invalid_backup(format!(
            "{} has no {TABLE_NAME} table",
            path.display()
        )));
    }
    Ok(conn)
}
