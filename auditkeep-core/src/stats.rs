//! Storage statistics and artifact listings.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::artifacts::{bytes_to_mb, ArtifactInfo};
use crate::compression::ArchiveFormat;
use crate::manager::{ARCHIVE_PREFIX, BACKUP_EXTENSION, BACKUP_PREFIX};
use crate::storage::RecordStore;
use crate::{Clock, LifecycleManager, Result, RetentionPolicy};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub log_count: u64,
    pub oldest_log: Option<DateTime<Utc>>,
    pub newest_log: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactStats {
    pub file_count: u64,
    pub total_size_mb: f64,
}

impl ArtifactStats {
    fn from_files(files: &[ArtifactInfo]) -> Self {
        Self {
            file_count: files.len() as u64,
            total_size_mb: bytes_to_mb(files.iter().map(|f| f.size_bytes).sum()),
        }
    }
}

/// Snapshot of where audit data currently lives
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStats {
    pub database: DatabaseStats,
    pub archives: ArtifactStats,
    pub backups: ArtifactStats,
    pub policy: RetentionPolicy,
}

impl<S, C> LifecycleManager<S, C>
where
    S: RecordStore,
    C: Clock,
{
    pub fn storage_stats(&self, policy: &RetentionPolicy) -> Result<StorageStats> {
        let log_count = self.store.count_all()?;
        let (oldest_log, newest_log) = match self.store.timestamp_range()? {
            Some((oldest, newest)) => (Some(oldest), Some(newest)),
            None => (None, None),
        };

        Ok(StorageStats {
            database: DatabaseStats {
                log_count,
                oldest_log,
                newest_log,
            },
            archives: ArtifactStats::from_files(&self.list_archives()?),
            backups: ArtifactStats::from_files(&self.list_backups()?),
            policy: *policy,
        })
    }

    /// Archive files, compressed or not, sorted by name
    pub fn list_archives(&self) -> Result<Vec<ArtifactInfo>> {
        let mut files = self.archives.list(ARCHIVE_PREFIX, "")?;
        files.retain(|f| ArchiveFormat::from_path(&f.path).is_some());
        Ok(files)
    }

    /// Backup snapshots sorted by name
    pub fn list_backups(&self) -> Result<Vec<ArtifactInfo>> {
        self.backups.list(BACKUP_PREFIX, BACKUP_EXTENSION)
    }
}
