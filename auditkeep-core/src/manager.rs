/*!
The lifecycle manager: one live record store, one clock and the two artifact
directories, shared by every stage.

Each stage lives in its own module as an `impl` block on [`LifecycleManager`]:
[`crate::retention`], [`crate::archive`], [`crate::compactor`],
[`crate::backup`], [`crate::janitor`], [`crate::stats`] and the orchestrator
in [`crate::maintenance`].
*/

use std::path::Path;

use crate::artifacts::ArtifactDir;
use crate::compression::{ArchiveFormat, GzipLevel};
use crate::config::LifecycleConfig;
use crate::storage::{RecordStore, SqliteRecordStore};
use crate::{Clock, LifecycleError, Result, SystemClock};

/// File name prefix of archive files
pub const ARCHIVE_PREFIX: &str = "audit_logs_";
/// File name prefix of backup snapshots
pub const BACKUP_PREFIX: &str = "audit_logs_backup_";
pub const BACKUP_EXTENSION: &str = ".sqlite";

/// Runs lifecycle stages against a record store
///
/// The manager is generic over the record store and the clock so tests can
/// inject a fixed time or a failing store.
///
/// # Example
/// ```rust
/// use auditkeep_core::{LifecycleConfig, LifecycleManager, MemoryRecordStore, RetentionPolicy, SystemClock};
///
/// let base = tempfile::tempdir()?;
/// let config = LifecycleConfig::from_base_dir(base.path());
/// let manager = LifecycleManager::new(MemoryRecordStore::new(), SystemClock, &config);
///
/// let result = manager.archive(&RetentionPolicy::default())?;
/// assert_eq!(result.archived_count, 0);
/// assert!(result.archive_file.is_none());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct LifecycleManager<S, C = SystemClock>
where
    S: RecordStore,
    C: Clock,
{
    pub(crate) store: S,
    pub(crate) clock: C,
    pub(crate) archives: ArtifactDir,
    pub(crate) backups: ArtifactDir,
    pub(crate) archive_format: ArchiveFormat,
    pub(crate) gzip_level: GzipLevel,
}

impl<S, C> LifecycleManager<S, C>
where
    S: RecordStore,
    C: Clock,
{
    /// Create a manager over `store` using the directories and encoding in `config`
    ///
    /// Directories are created on first use, not here.
    pub fn new(store: S, clock: C, config: &LifecycleConfig) -> Self {
        Self {
            store,
            clock,
            archives: ArtifactDir::new(&config.archive_dir),
            backups: ArtifactDir::new(&config.backup_dir),
            archive_format: config.archive_format,
            gzip_level: config.gzip_level,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn archive_dir(&self) -> &Path {
        self.archives.path()
    }

    pub fn backup_dir(&self) -> &Path {
        self.backups.path()
    }

    pub fn archive_format(&self) -> ArchiveFormat {
        self.archive_format
    }
}

impl LifecycleManager<SqliteRecordStore, SystemClock> {
    /// Open the live SQLite database named by `config.database_path`
    ///
    /// # Errors
    /// * `LifecycleError::Config` - no database path is configured, or the config is invalid
    /// * `LifecycleError::Storage` - the database cannot be opened
    pub fn open(config: &LifecycleConfig) -> Result<Self> {
        config.validate()?;
        let path = config
            .database_path
            .as_ref()
            .ok_or_else(|| LifecycleError::config("database_path is not configured"))?;
        let store = SqliteRecordStore::open(path)?;
        Ok(Self::new(store, SystemClock, config))
    }
}
