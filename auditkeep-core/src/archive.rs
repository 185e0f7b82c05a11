/*!
Archive writer: move live records older than the archive threshold into a
cold-storage file.

An archive file holds one JSON object per line, ordered by timestamp. The file
is complete and on disk before any live row is deleted, so a crash between
the two leaves duplicated data, never lost data.
*/

use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::artifacts::{bytes_to_mb, file_size, sha256_file};
use crate::compression::{open_archive_reader, RecordEncoder};
use crate::manager::ARCHIVE_PREFIX;
use crate::observability::{record_count, Counted, StageTimer};
use crate::storage::{RecordFilter, RecordStore};
use crate::{AuditRecord, Clock, LifecycleError, LifecycleManager, Result, RetentionPolicy};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveResult {
    /// Live rows removed after the archive file was written
    pub archived_count: u64,
    /// `None` when nothing was old enough to archive
    pub archive_file: Option<PathBuf>,
    pub archive_size_mb: f64,
    pub archive_cutoff: DateTime<Utc>,
    /// Hex SHA-256 of the archive file
    pub checksum: Option<String>,
}

impl<S, C> LifecycleManager<S, C>
where
    S: RecordStore,
    C: Clock,
{
    /// Archive live records with `timestamp < now - archive_after_days`
    ///
    /// # Returns
    /// An [`ArchiveResult`]; `archived_count == 0` and no file when the
    /// selection is empty
    ///
    /// # Errors
    /// * `LifecycleError::Storage` - selecting the records failed (no file is written)
    /// * `LifecycleError::Filesystem` - the archive file could not be written
    /// * `LifecycleError::PartialArchive` - the file was published but the
    ///   live rows could not be deleted; the file is kept
    pub fn archive(&self, policy: &RetentionPolicy) -> Result<ArchiveResult> {
        let timer = StageTimer::start("archive");
        let result = self.archive_records(policy);
        timer.observe(&result);
        result
    }

    fn archive_records(&self, policy: &RetentionPolicy) -> Result<ArchiveResult> {
        let now = self.clock.now();
        let archive_cutoff = policy.archive_cutoff(now);
        let filter = RecordFilter::OlderThan(archive_cutoff);

        let records = self.store.select_where(&filter)?;
        if records.is_empty() {
            info!(cutoff = %archive_cutoff, "No records old enough to archive");
            return Ok(ArchiveResult {
                archived_count: 0,
                archive_file: None,
                archive_size_mb: 0.0,
                archive_cutoff,
                checksum: None,
            });
        }

        let archive_file = self.write_archive(&records, now)?;
        let size_bytes = file_size(&archive_file)?;
        let checksum = sha256_file(&archive_file)?;

        let archived_count = match self.store.delete_where(&filter) {
            Ok(deleted) => deleted,
            Err(source) => {
                error!(
                    archive_file = %archive_file.display(),
                    error = %source,
                    "Archive written but live records could not be deleted"
                );
                return Err(LifecycleError::PartialArchive {
                    archive_file,
                    source: Box::new(source),
                });
            }
        };

        let selected = records.len() as u64;
        if archived_count != selected {
            warn!(
                selected,
                deleted = archived_count,
                "Live records changed between archive selection and deletion"
            );
        }

        record_count(Counted::Archived, archived_count);
        info!(
            archived_count,
            archive_file = %archive_file.display(),
            size_bytes,
            "Archived audit records"
        );

        Ok(ArchiveResult {
            archived_count,
            archive_file: Some(archive_file),
            archive_size_mb: bytes_to_mb(size_bytes),
            archive_cutoff,
            checksum: Some(checksum),
        })
    }

    /// Stream `records` into a temporary file, sync it and publish it
    fn write_archive(&self, records: &[AuditRecord], now: DateTime<Utc>) -> Result<PathBuf> {
        let temp = self.archives.temp_file(ARCHIVE_PREFIX)?;
        let temp_path = temp.path().to_path_buf();
        let io_error = |e: std::io::Error| LifecycleError::filesystem(&temp_path, e);

        let mut encoder = RecordEncoder::new(
            BufWriter::new(temp),
            self.archive_format,
            self.gzip_level,
        );
        for record in records {
            serde_json::to_writer(&mut encoder, record)?;
            encoder.write_all(b"\n").map_err(io_error)?;
        }

        let temp = encoder
            .finish()
            .map_err(io_error)?
            .into_inner()
            .map_err(|e| io_error(e.into_error()))?;
        temp.as_file().sync_all().map_err(io_error)?;

        debug!(
            records = records.len(),
            format = self.archive_format.algorithm_name(),
            "Archive body written, publishing"
        );
        self.archives
            .publish(temp, ARCHIVE_PREFIX, self.archive_format.extension(), now)
    }
}

/// Read back every record in an archive file (gzip or plain, by extension)
pub fn read_archive<P: AsRef<Path>>(path: P) -> Result<Vec<AuditRecord>> {
    let path = path.as_ref();
    let reader = open_archive_reader(path)?;

    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| LifecycleError::filesystem(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
