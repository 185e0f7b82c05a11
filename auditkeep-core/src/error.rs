/*!
Error types for the auditkeep lifecycle engine.
*/

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type used throughout the auditkeep core.
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Errors that can occur during lifecycle operations.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Retention policy rejected at construction
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// Restore target does not exist
    #[error("Backup file not found: {}", .0.display())]
    BackupNotFound(PathBuf),

    /// Restore target exists but is not a readable snapshot
    #[error("Invalid backup: {0}")]
    InvalidBackup(String),

    /// The live record store failed or is unavailable
    #[error("Storage error: {0}")]
    Storage(String),

    /// Directory or file operation failed
    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// A full maintenance run finished with the named stages failed
    #[error("Maintenance stages failed: {}", .0.join(", "))]
    MaintenanceFailed(Vec<String>),

    /// The archive file was written but the live rows could not be removed
    #[error("Archive written to {} but live rows were not deleted: {source}", archive_file.display())]
    PartialArchive {
        archive_file: PathBuf,
        #[source]
        source: Box<LifecycleError>,
    },
}

impl LifecycleError {
    /// Create a new invalid policy error
    pub fn invalid_policy<S: Into<String>>(msg: S) -> Self {
        Self::InvalidPolicy(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new invalid backup error
    pub fn invalid_backup<S: Into<String>>(msg: S) -> Self {
        Self::InvalidBackup(msg.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Wrap an I/O error with the path it happened on
    pub fn filesystem<P: AsRef<Path>>(path: P, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<rusqlite::Error> for LifecycleError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
