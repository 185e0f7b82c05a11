/*!
Full maintenance: every lifecycle stage in order, with per-stage outcomes.

Stages run retention, archive, compress, backup, then backup cleanup. A stage
failure is recorded in the report and the remaining stages still run. Nothing
is rolled back.
*/

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::archive::ArchiveResult;
use crate::backup::BackupResult;
use crate::compactor::CompactionResult;
use crate::janitor::CleanupResult;
use crate::retention::RetentionResult;
use crate::storage::RecordStore;
use crate::{Clock, LifecycleManager, Result, RetentionPolicy};

/// Result of one stage inside a maintenance run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome<T> {
    Completed { result: T },
    Failed { error: String },
}

impl<T> StageOutcome<T> {
    fn from_result(stage: &str, result: Result<T>) -> Self {
        match result {
            Ok(result) => StageOutcome::Completed { result },
            Err(e) => {
                error!(stage, error = %e, "Maintenance stage failed");
                StageOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StageOutcome::Completed { .. })
    }

    pub fn result(&self) -> Option<&T> {
        match self {
            StageOutcome::Completed { result } => Some(result),
            StageOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            StageOutcome::Completed { .. } => None,
            StageOutcome::Failed { error } => Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenanceReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub retention: StageOutcome<RetentionResult>,
    pub archive: StageOutcome<ArchiveResult>,
    pub compression: StageOutcome<CompactionResult>,
    pub backup: StageOutcome<BackupResult>,
    pub cleanup: StageOutcome<CleanupResult>,
}

impl MaintenanceReport {
    /// Names of the stages that failed, in run order
    pub fn failed_stages(&self) -> Vec<&'static str> {
        let stages = [
            ("retention", self.retention.is_completed()),
            ("archive", self.archive.is_completed()),
            ("compression", self.compression.is_completed()),
            ("backup", self.backup.is_completed()),
            ("cleanup", self.cleanup.is_completed()),
        ];
        stages
            .into_iter()
            .filter(|(_, completed)| !completed)
            .map(|(name, _)| name)
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.failed_stages().is_empty()
    }
}

impl<S, C> LifecycleManager<S, C>
where
    S: RecordStore,
    C: Clock,
{
    /// Run every stage once
    ///
    /// # Arguments
    /// * `policy` - Thresholds for retention, archive and compression
    /// * `backup_keep_days` - Keep window passed to the backup janitor
    pub fn run_full_maintenance(
        &self,
        policy: &RetentionPolicy,
        backup_keep_days: u32,
    ) -> MaintenanceReport {
        let started_at = self.clock.now();
        info!(
            retention_days = policy.retention_days(),
            archive_after_days = policy.archive_after_days(),
            compress_after_days = policy.compress_after_days(),
            backup_keep_days,
            "Starting full maintenance"
        );

        let retention = StageOutcome::from_result("retention", self.apply_retention(policy));
        let archive = StageOutcome::from_result("archive", self.archive(policy));
        let compression =
            StageOutcome::from_result("compression", self.compress_old_archives(policy));
        let backup = StageOutcome::from_result("backup", self.create_backup());
        let cleanup =
            StageOutcome::from_result("cleanup", self.cleanup_old_backups(backup_keep_days));

        let report = MaintenanceReport {
            started_at,
            finished_at: self.clock.now(),
            retention,
            archive,
            compression,
            backup,
            cleanup,
        };

        let failed = report.failed_stages();
        if failed.is_empty() {
            info!("Full maintenance completed");
        } else {
            error!(failed_stages = ?failed, "Full maintenance finished with failures");
        }
        report
    }
}
