//! Backup janitor: remove backup snapshots past their keep window.

use std::fs;
use std::io;

use serde::Serialize;
use tracing::{debug, info};

use crate::artifacts::bytes_to_mb;
use crate::manager::{BACKUP_EXTENSION, BACKUP_PREFIX};
use crate::observability::{record_count, Counted, StageTimer};
use crate::policy::days_before;
use crate::storage::RecordStore;
use crate::{Clock, LifecycleError, LifecycleManager, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupResult {
    pub deleted_count: u64,
    pub freed_mb: f64,
    pub cutoff_days: u32,
}

impl<S, C> LifecycleManager<S, C>
where
    S: RecordStore,
    C: Clock,
{
    /// Delete `audit_logs_backup_*.sqlite` files modified more than `keep_days` ago
    pub fn cleanup_old_backups(&self, keep_days: u32) -> Result<CleanupResult> {
        let timer = StageTimer::start("cleanup");
        let result = self.remove_expired_backups(keep_days);
        timer.observe(&result);
        result
    }

    fn remove_expired_backups(&self, keep_days: u32) -> Result<CleanupResult> {
        let cutoff = days_before(self.clock.now(), keep_days);
        let mut deleted_count = 0u64;
        let mut freed_bytes = 0u64;

        for backup in self.backups.list(BACKUP_PREFIX, BACKUP_EXTENSION)? {
            if backup.modified >= cutoff {
                continue;
            }
            match fs::remove_file(&backup.path) {
                Ok(()) => {}
                // Removed by a concurrent run
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(LifecycleError::filesystem(&backup.path, e)),
            }
            debug!(file = %backup.path.display(), "Deleted expired backup");
            deleted_count += 1;
            freed_bytes += backup.size_bytes;
        }

        record_count(Counted::BackupsDeleted, deleted_count);
        let freed_mb = bytes_to_mb(freed_bytes);
        info!(deleted_count, freed_mb, keep_days, "Cleaned up old backups");

        Ok(CleanupResult {
            deleted_count,
            freed_mb,
            cutoff_days: keep_days,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FixedClock, LifecycleConfig, MemoryRecordStore};
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_cleanup_removes_only_expired_backups() {
        let temp_dir = TempDir::new().unwrap();
        let config = LifecycleConfig::from_base_dir(temp_dir.path());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let manager = LifecycleManager::new(MemoryRecordStore::new(), clock.clone(), &config);

        manager.create_backup().unwrap();
        manager.create_backup().unwrap();
        // Files the janitor must leave alone
        std::fs::write(config.backup_dir.join("notes.sqlite"), b"keep").unwrap();
        std::fs::write(config.backup_dir.join("audit_logs_backup_x.db"), b"keep").unwrap();

        let fresh = manager.cleanup_old_backups(30).unwrap();
        assert_eq!(fresh.deleted_count, 0);
        assert_eq!(fresh.cutoff_days, 30);

        clock.advance(Duration::days(31));
        let result = manager.cleanup_old_backups(30).unwrap();
        assert_eq!(result.deleted_count, 2);
        assert!(result.freed_mb > 0.0);
        assert!(manager.list_backups().unwrap().is_empty());
        assert!(config.backup_dir.join("notes.sqlite").exists());
        assert!(config.backup_dir.join("audit_logs_backup_x.db").exists());

        let again = manager.cleanup_old_backups(30).unwrap();
        assert_eq!(again.deleted_count, 0);
        assert_eq!(again.freed_mb, 0.0);
    }

    #[test]
    fn test_cleanup_without_backup_directory() {
        let temp_dir = TempDir::new().unwrap();
        let manager = LifecycleManager::new(
            MemoryRecordStore::new(),
            FixedClock::new(Utc::now()),
            &LifecycleConfig::from_base_dir(temp_dir.path()),
        );
        let result = manager.cleanup_old_backups(0).unwrap();
        assert_eq!(result.deleted_count, 0);
    }
}
