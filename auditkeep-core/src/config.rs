//! Configuration for the lifecycle engine
//!
//! A [`LifecycleConfig`] names the two artifact directories, the optional live
//! database, the retention policy and the archive encoding. It can be laid out
//! under one base directory or loaded from a JSON file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::compression::{ArchiveFormat, GzipLevel};
use crate::{LifecycleError, Result, RetentionPolicy};

pub const DEFAULT_BACKUP_KEEP_DAYS: u32 = 30;

/// Where artifacts live and how stages behave
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Directory for `audit_logs_<stamp>.json[.gz]` archive files
    pub archive_dir: PathBuf,
    /// Directory for `audit_logs_backup_<stamp>.sqlite` snapshots
    pub backup_dir: PathBuf,
    /// Live SQLite database; `None` when the caller supplies its own store
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub policy: RetentionPolicy,
    /// Backups older than this many days are removed by the janitor
    #[serde(default = "default_backup_keep_days")]
    pub backup_keep_days: u32,
    #[serde(default)]
    pub archive_format: ArchiveFormat,
    #[serde(default)]
    pub gzip_level: GzipLevel,
}

fn default_backup_keep_days() -> u32 {
    DEFAULT_BACKUP_KEEP_DAYS
}

impl LifecycleConfig {
    /// Lay out `<base>/archives/audit_logs` and `<base>/backups/audit_logs`
    pub fn from_base_dir<P: AsRef<Path>>(base: P) -> Self {
        let base = base.as_ref();
        Self {
            archive_dir: base.join("archives").join("audit_logs"),
            backup_dir: base.join("backups").join("audit_logs"),
            database_path: None,
            policy: RetentionPolicy::default(),
            backup_keep_days: DEFAULT_BACKUP_KEEP_DAYS,
            archive_format: ArchiveFormat::default(),
            gzip_level: GzipLevel::default(),
        }
    }

    /// Load and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| LifecycleError::filesystem(path, e))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            LifecycleError::config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_database<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn with_policy(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_archive_format(mut self, format: ArchiveFormat) -> Self {
        self.archive_format = format;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.archive_dir.as_os_str().is_empty() {
            return Err(LifecycleError::config("archive_dir must not be empty"));
        }
        if self.backup_dir.as_os_str().is_empty() {
            return Err(LifecycleError::config("backup_dir must not be empty"));
        }
        if self.archive_dir == self.backup_dir {
            return Err(LifecycleError::config(
                "archive_dir and backup_dir must be different directories",
            ));
        }
        if let Some(db) = &self.database_path {
            if db.as_os_str().is_empty() {
                return Err(LifecycleError::config("database_path must not be empty"));
            }
        }
        Ok(())
    }
}
