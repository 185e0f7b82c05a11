//! Archive compaction: replace aged plain `.json` archives with gzip copies.

use std::fs::{self, File};
use std::io::BufWriter;

use serde::Serialize;
use tracing::{debug, info};

use crate::artifacts::{bytes_to_mb, file_size, ArtifactInfo};
use crate::compression::{gzip_stream, GZIP_EXTENSION, PLAIN_EXTENSION};
use crate::manager::ARCHIVE_PREFIX;
use crate::observability::{record_count, Counted, StageTimer};
use crate::storage::RecordStore;
use crate::{Clock, LifecycleError, LifecycleManager, Result, RetentionPolicy};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactionResult {
    pub compressed_count: u64,
    /// Sum of `original - compressed` over all files; negative if gzip grew them
    pub total_saved_mb: f64,
}

impl<S, C> LifecycleManager<S, C>
where
    S: RecordStore,
    C: Clock,
{
    /// Gzip every uncompressed archive whose modification time is older than
    /// `now - compress_after_days`
    ///
    /// The original is removed only after its `.json.gz` copy is complete.
    /// Running again finds nothing left to compress.
    pub fn compress_old_archives(&self, policy: &RetentionPolicy) -> Result<CompactionResult> {
        let timer = StageTimer::start("compress");
        let result = self.compact(policy);
        timer.observe(&result);
        result
    }

    fn compact(&self, policy: &RetentionPolicy) -> Result<CompactionResult> {
        let cutoff = policy.compress_cutoff(self.clock.now());
        let mut compressed_count = 0u64;
        let mut saved_bytes = 0i64;

        for archive in self.archives.list(ARCHIVE_PREFIX, PLAIN_EXTENSION)? {
            if archive.modified >= cutoff {
                debug!(file = %archive.path.display(), "Archive too recent to compress");
                continue;
            }
            saved_bytes += self.gzip_archive(&archive)?;
            compressed_count += 1;
        }

        record_count(Counted::Compressed, compressed_count);
        let total_saved_mb = saved_bytes as f64 / crate::artifacts::BYTES_PER_MB;
        info!(
            compressed_count,
            saved_mb = total_saved_mb,
            "Compressed archive files"
        );

        Ok(CompactionResult {
            compressed_count,
            total_saved_mb,
        })
    }

    /// Write `<stem>.json.gz` beside `archive`, then delete the original.
    /// An existing gzip archive of the same name is kept and the copy gets a
    /// `_n` suffix. Returns bytes saved.
    fn gzip_archive(&self, archive: &ArtifactInfo) -> Result<i64> {
        let name = archive.file_name();
        let stem = name.strip_suffix(PLAIN_EXTENSION).unwrap_or(name.as_str());

        let mut source =
            File::open(&archive.path).map_err(|e| LifecycleError::filesystem(&archive.path, e))?;
        let temp = self.archives.temp_file(ARCHIVE_PREFIX)?;
        let temp_path = temp.path().to_path_buf();
        let io_error = |e: std::io::Error| LifecycleError::filesystem(&temp_path, e);

        let temp = gzip_stream(&mut source, BufWriter::new(temp), self.gzip_level)
            .map_err(io_error)?
            .into_inner()
            .map_err(|e| io_error(e.into_error()))?;
        temp.as_file().sync_all().map_err(io_error)?;
        let target = self.archives.publish_as(temp, stem, GZIP_EXTENSION)?;

        let compressed = file_size(&target)?;
        fs::remove_file(&archive.path)
            .map_err(|e| LifecycleError::filesystem(&archive.path, e))?;

        let saved = archive.size_bytes as i64 - compressed as i64;
        debug!(
            file = %archive.path.display(),
            original_mb = bytes_to_mb(archive.size_bytes),
            compressed_mb = bytes_to_mb(compressed),
            "Compressed archive"
        );
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::read_archive;
    use crate::compression::ArchiveFormat;
    use crate::{AuditAction, AuditRecord, FixedClock, LifecycleConfig, MemoryRecordStore};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_compacts_aged_plain_archives_once() {
        let temp_dir = TempDir::new().unwrap();
        let config = LifecycleConfig::from_base_dir(temp_dir.path())
            .with_archive_format(ArchiveFormat::Plain);

        // Archive timestamps come from the fixed clock, the file mtime is real time
        let records: Vec<AuditRecord> = (0..20)
            .map(|i| {
                AuditRecord::new(Uuid::new_v4(), AuditAction::Search, "report", format!("r-{i}"))
                    .with_timestamp(Utc::now() - Duration::days(60))
            })
            .collect();
        let clock = std::sync::Arc::new(FixedClock::new(Utc::now()));
        let manager = LifecycleManager::new(
            MemoryRecordStore::with_records(records.clone()),
            clock.clone(),
            &config,
        );
        let policy = RetentionPolicy::default();
        let plain = manager.archive(&policy).unwrap().archive_file.unwrap();

        // Not old enough yet
        let none = manager.compress_old_archives(&policy).unwrap();
        assert_eq!(none.compressed_count, 0);
        assert!(plain.exists());

        clock.advance(Duration::days(8));
        let result = manager.compress_old_archives(&policy).unwrap();
        assert_eq!(result.compressed_count, 1);
        assert!(result.total_saved_mb > 0.0);
        assert!(!plain.exists());

        let archives = manager.list_archives().unwrap();
        assert_eq!(archives.len(), 1);
        let gz = &archives[0].path;
        assert!(gz.to_string_lossy().ends_with(".json.gz"));
        assert_eq!(read_archive(gz).unwrap().len(), records.len());

        let again = manager.compress_old_archives(&policy).unwrap();
        assert_eq!(again.compressed_count, 0);
        assert_eq!(again.total_saved_mb, 0.0);
    }

    fn archive_line(resource_id: &str) -> String {
        let record = AuditRecord::new(Uuid::new_v4(), AuditAction::View, "report", resource_id)
            .with_timestamp(start());
        format!("{}\n", serde_json::to_string(&record).unwrap())
    }

    #[test]
    fn test_existing_gzip_archive_is_not_overwritten() {
        let temp_dir = TempDir::new().unwrap();
        let config = LifecycleConfig::from_base_dir(temp_dir.path());
        std::fs::create_dir_all(&config.archive_dir).unwrap();

        // A gzip and a plain archive published in the same second
        let gz_manager = LifecycleManager::new(
            MemoryRecordStore::with_records(vec![AuditRecord::new(
                Uuid::new_v4(),
                AuditAction::Create,
                "session",
                "s-1",
            )
            .with_timestamp(start() - Duration::days(60))]),
            FixedClock::new(start()),
            &config,
        );
        let existing = gz_manager
            .archive(&RetentionPolicy::default())
            .unwrap()
            .archive_file
            .unwrap();
        let plain = config.archive_dir.join("audit_logs_20240601_000000.json");
        assert_eq!(
            existing.file_name().unwrap(),
            "audit_logs_20240601_000000.json.gz"
        );
        std::fs::write(&plain, archive_line("r-1") + &archive_line("r-2")).unwrap();

        let manager = LifecycleManager::new(
            MemoryRecordStore::new(),
            FixedClock::new(Utc::now() + Duration::days(30)),
            &config,
        );
        let result = manager
            .compress_old_archives(&RetentionPolicy::default())
            .unwrap();
        assert_eq!(result.compressed_count, 1);
        assert!(!plain.exists());

        assert_eq!(read_archive(&existing).unwrap().len(), 1);
        let copy = config.archive_dir.join("audit_logs_20240601_000000_1.json.gz");
        assert_eq!(read_archive(&copy).unwrap().len(), 2);
        assert_eq!(manager.list_archives().unwrap().len(), 2);
    }

    #[test]
    fn test_tiny_archive_reports_negative_savings() {
        let temp_dir = TempDir::new().unwrap();
        let config = LifecycleConfig::from_base_dir(temp_dir.path());
        std::fs::create_dir_all(&config.archive_dir).unwrap();
        std::fs::write(config.archive_dir.join("audit_logs_20240101_000000.json"), b"{}\n")
            .unwrap();

        let manager = LifecycleManager::new(
            MemoryRecordStore::new(),
            FixedClock::new(Utc::now() + Duration::days(30)),
            &config,
        );
        let result = manager
            .compress_old_archives(&RetentionPolicy::default())
            .unwrap();
        assert_eq!(result.compressed_count, 1);
        assert!(result.total_saved_mb < 0.0);
    }

    #[test]
    fn test_gzip_archives_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let config = LifecycleConfig::from_base_dir(temp_dir.path());
        std::fs::create_dir_all(&config.archive_dir).unwrap();
        std::fs::write(
            config.archive_dir.join("audit_logs_20240101_000000.json.gz"),
            b"not really gzip",
        )
        .unwrap();

        let manager = LifecycleManager::new(
            MemoryRecordStore::new(),
            FixedClock::new(Utc::now() + Duration::days(365)),
            &config,
        );
        let result = manager
            .compress_old_archives(&RetentionPolicy::default())
            .unwrap();
        assert_eq!(result.compressed_count, 0);
    }

    #[test]
    fn test_missing_archive_directory_compacts_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let manager = LifecycleManager::new(
            MemoryRecordStore::new(),
            FixedClock::new(start()),
            &LifecycleConfig::from_base_dir(temp_dir.path().join("fresh")),
        );
        let result = manager
            .compress_old_archives(&RetentionPolicy::default())
            .unwrap();
        assert_eq!(result.compressed_count, 0);
        assert!(!manager.archive_dir().exists());
    }
}
