/*!
Periodic maintenance scheduler (feature `scheduler`).

The scheduler is an ordinary value owned by the process entry point. `start()`
spawns one tokio task per [`MaintenanceJob`]; each task waits out its interval,
runs its stage on the blocking pool and records the outcome. Transient stage
failures (storage or filesystem errors) are retried with exponential backoff.

Every run reads the scheduler's current policy, so [`MaintenanceScheduler::update_policy`]
takes effect on the next run of each job. Intervals are fixed when the
scheduler starts.
*/

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use auditkeep_retry::{permanent_error, with_custom_backoff, RetryError, RetryPolicy, RetryableError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::storage::RecordStore;
use crate::{Clock, LifecycleError, LifecycleManager, Result, RetentionPolicy};

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// The recurring jobs, one task each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceJob {
    CompressArchives,
    RetentionPolicy,
    ArchiveLogs,
    CreateBackup,
    CleanupBackups,
    FullMaintenance,
}

impl MaintenanceJob {
    pub const ALL: [MaintenanceJob; 6] = [
        MaintenanceJob::CompressArchives,
        MaintenanceJob::RetentionPolicy,
        MaintenanceJob::ArchiveLogs,
        MaintenanceJob::CreateBackup,
        MaintenanceJob::CleanupBackups,
        MaintenanceJob::FullMaintenance,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            MaintenanceJob::CompressArchives => "compress_archives",
            MaintenanceJob::RetentionPolicy => "retention_policy",
            MaintenanceJob::ArchiveLogs => "archive_logs",
            MaintenanceJob::CreateBackup => "create_backup",
            MaintenanceJob::CleanupBackups => "cleanup_backups",
            MaintenanceJob::FullMaintenance => "full_maintenance",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MaintenanceJob::CompressArchives => "Compress Archives",
            MaintenanceJob::RetentionPolicy => "Apply Retention Policy",
            MaintenanceJob::ArchiveLogs => "Archive Old Logs",
            MaintenanceJob::CreateBackup => "Create Backup",
            MaintenanceJob::CleanupBackups => "Cleanup Old Backups",
            MaintenanceJob::FullMaintenance => "Full Maintenance",
        }
    }

    /// Run cadence. Backups follow `backup_interval_hours` (at least one hour).
    pub fn interval(&self, policy: &RetentionPolicy) -> Duration {
        match self {
            MaintenanceJob::CompressArchives | MaintenanceJob::RetentionPolicy => DAY,
            MaintenanceJob::ArchiveLogs | MaintenanceJob::CleanupBackups => DAY * 7,
            MaintenanceJob::CreateBackup => HOUR * policy.backup_interval_hours().max(1),
            MaintenanceJob::FullMaintenance => DAY * 30,
        }
    }

    /// Full maintenance already isolates stage failures, so it is not retried as a whole
    fn retries(&self) -> bool {
        !matches!(self, MaintenanceJob::FullMaintenance)
    }
}

/// Outcome of the most recent run of a job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: &'static str,
    pub name: &'static str,
    pub interval_secs: u64,
    pub run_count: u64,
    pub failure_count: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_outcome: Option<JobOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub jobs: Vec<JobStatus>,
}

#[derive(Debug, Default, Clone)]
struct JobState {
    run_count: u64,
    failure_count: u64,
    last_run: Option<DateTime<Utc>>,
    last_outcome: Option<JobOutcome>,
}

impl RetryableError for LifecycleError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            LifecycleError::Storage(_) | LifecycleError::Filesystem { .. }
        )
    }
}

/// State shared between the scheduler handle and its job tasks
struct JobContext<S, C>
where
    S: RecordStore,
    C: Clock,
{
    manager: Arc<LifecycleManager<S, C>>,
    policy: RwLock<RetentionPolicy>,
    backup_keep_days: u32,
    retry: RetryPolicy,
    jobs: Mutex<HashMap<MaintenanceJob, JobState>>,
}

impl<S, C> JobContext<S, C>
where
    S: RecordStore + 'static,
    C: Clock + 'static,
{
    fn policy(&self) -> RetentionPolicy {
        *self.policy.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<MaintenanceJob, JobState>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `job` once with retries; the blocking stage call is tracked by `tracker`
    async fn run_once(&self, job: MaintenanceJob, tracker: &TaskTracker) -> JobOutcome {
        let started = self.manager.clock().now();
        let policy = self.policy();
        let keep_days = self.backup_keep_days;
        let retry = if job.retries() {
            self.retry.clone()
        } else {
            RetryPolicy::new(1, self.retry.backoff.clone())
        };

        let result = with_custom_backoff(job.id(), retry, |_attempt| {
            let manager = Arc::clone(&self.manager);
            let handle =
                tracker.spawn_blocking(move || execute(&*manager, job, &policy, keep_days));
            async move {
                match handle.await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(RetryError::classify(job.id(), e)),
                    Err(join_error) => Err(permanent_error!(job.id(), join_error)),
                }
            }
        })
        .await;

        let outcome = match result {
            Ok(()) => {
                info!(job = job.id(), "Scheduled job completed");
                JobOutcome::Succeeded
            }
            Err(e) => {
                error!(job = job.id(), error = %e, "Scheduled job failed");
                JobOutcome::Failed {
                    error: e.source_error().to_string(),
                }
            }
        };

        let mut jobs = self.jobs();
        let state = jobs.entry(job).or_default();
        state.run_count += 1;
        if matches!(outcome, JobOutcome::Failed { .. }) {
            state.failure_count += 1;
        }
        state.last_run = Some(started);
        state.last_outcome = Some(outcome.clone());
        outcome
    }
}

/// Synchronous body of a job
fn execute<S, C>(
    manager: &LifecycleManager<S, C>,
    job: MaintenanceJob,
    policy: &RetentionPolicy,
    backup_keep_days: u32,
) -> Result<()>
where
    S: RecordStore,
    C: Clock,
{
    match job {
        MaintenanceJob::CompressArchives => manager.compress_old_archives(policy).map(drop),
        MaintenanceJob::RetentionPolicy => manager.apply_retention(policy).map(drop),
        MaintenanceJob::ArchiveLogs => manager.archive(policy).map(drop),
        MaintenanceJob::CreateBackup => manager.create_backup().map(drop),
        MaintenanceJob::CleanupBackups => manager.cleanup_old_backups(backup_keep_days).map(drop),
        MaintenanceJob::FullMaintenance => {
            let report = manager.run_full_maintenance(policy, backup_keep_days);
            if report.is_success() {
                Ok(())
            } else {
                Err(LifecycleError::MaintenanceFailed(
                    report.failed_stages().into_iter().map(String::from).collect(),
                ))
            }
        }
    }
}

struct Running {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// Runs the maintenance jobs on fixed intervals
///
/// # Example
/// ```rust,no_run
/// use auditkeep_core::scheduler::MaintenanceScheduler;
/// use auditkeep_core::{LifecycleConfig, LifecycleManager};
///
/// # async fn run() -> auditkeep_core::Result<()> {
/// let config = LifecycleConfig::from_base_dir("/var/lib/app").with_database("/var/lib/app/audit.sqlite");
/// let manager = LifecycleManager::open(&config)?;
/// let scheduler = MaintenanceScheduler::new(manager, config.policy, config.backup_keep_days);
///
/// scheduler.start()?;
/// tokio::signal::ctrl_c().await.ok();
/// scheduler.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct MaintenanceScheduler<S, C>
where
    S: RecordStore,
    C: Clock,
{
    ctx: Arc<JobContext<S, C>>,
    running: Mutex<Option<Running>>,
}

impl<S, C> MaintenanceScheduler<S, C>
where
    S: RecordStore + 'static,
    C: Clock + 'static,
{
    pub fn new(manager: LifecycleManager<S, C>, policy: RetentionPolicy, backup_keep_days: u32) -> Self {
        let jobs = MaintenanceJob::ALL
            .into_iter()
            .map(|job| (job, JobState::default()))
            .collect();
        Self {
            ctx: Arc::new(JobContext {
                manager: Arc::new(manager),
                policy: RwLock::new(policy),
                backup_keep_days,
                retry: RetryPolicy::maintenance(),
                jobs: Mutex::new(jobs),
            }),
            running: Mutex::new(None),
        }
    }

    /// Replace the retry policy used for failed runs. Only valid before `start()`.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        if let Some(ctx) = Arc::get_mut(&mut self.ctx) {
            ctx.retry = retry;
        }
        self
    }

    pub fn manager(&self) -> &LifecycleManager<S, C> {
        &self.ctx.manager
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the job tasks. Starting a running scheduler does nothing.
    ///
    /// # Errors
    /// * `LifecycleError::Config` - called outside a tokio runtime
    pub fn start(&self) -> Result<()> {
        let mut running = self.running();
        if running.is_some() {
            warn!("Maintenance scheduler already running");
            return Ok(());
        }
        tokio::runtime::Handle::try_current().map_err(|e| {
            LifecycleError::config(format!("scheduler must be started inside a tokio runtime: {e}"))
        })?;

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let policy = self.ctx.policy();

        for job in MaintenanceJob::ALL {
            let period = job.interval(&policy);
            let ctx = Arc::clone(&self.ctx);
            let cancel = cancel.clone();
            let job_tracker = tracker.clone();

            tracker.spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ctx.run_once(job, &job_tracker) => {}
                    }
                }
            });
        }

        info!(jobs = MaintenanceJob::ALL.len(), "Maintenance scheduler started");
        *running = Some(Running { cancel, tracker });
        Ok(())
    }

    /// Cancel the job tasks and wait for any in-flight stage call to finish
    pub async fn stop(&self) {
        let Some(Running { cancel, tracker }) = self.running().take() else {
            return;
        };
        cancel.cancel();
        tracker.close();
        tracker.wait().await;
        info!("Maintenance scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Run one job immediately, outside its schedule
    pub async fn run_now(&self, job: MaintenanceJob) -> JobOutcome {
        let tracker = TaskTracker::new();
        let outcome = self.ctx.run_once(job, &tracker).await;
        tracker.close();
        tracker.wait().await;
        outcome
    }

    /// Policy used by the next run of each job
    pub fn policy(&self) -> RetentionPolicy {
        self.ctx.policy()
    }

    /// Swap the policy for subsequent runs
    pub fn update_policy(&self, policy: RetentionPolicy) {
        *self
            .ctx
            .policy
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = policy;
        info!(
            retention_days = policy.retention_days(),
            archive_after_days = policy.archive_after_days(),
            compress_after_days = policy.compress_after_days(),
            "Updated maintenance policy"
        );
    }

    pub fn status(&self) -> SchedulerStatus {
        let policy = self.ctx.policy();
        let jobs = self.ctx.jobs();
        SchedulerStatus {
            running: self.is_running(),
            jobs: MaintenanceJob::ALL
                .into_iter()
                .map(|job| {
                    let state = jobs.get(&job).cloned().unwrap_or_default();
                    JobStatus {
                        id: job.id(),
                        name: job.name(),
                        interval_secs: job.interval(&policy).as_secs(),
                        run_count: state.run_count,
                        failure_count: state.failure_count,
                        last_run: state.last_run,
                        last_outcome: state.last_outcome,
                    }
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MockRecordStore;
    use crate::{AuditAction, AuditRecord, FixedClock, LifecycleConfig, MemoryRecordStore};
    use auditkeep_retry::ExponentialBackoffBuilder;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn quick_retry(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(10))
                .with_max_elapsed_time(None)
                .build(),
        )
    }

    fn memory_scheduler(temp_dir: &TempDir) -> MaintenanceScheduler<MemoryRecordStore, FixedClock> {
        let now = Utc::now();
        let store = MemoryRecordStore::with_records(vec![
            AuditRecord::new(Uuid::new_v4(), AuditAction::View, "page", "old")
                .with_timestamp(now - ChronoDuration::days(200)),
            AuditRecord::new(Uuid::new_v4(), AuditAction::View, "page", "new")
                .with_timestamp(now),
        ]);
        let manager = LifecycleManager::new(
            store,
            FixedClock::new(now),
            &LifecycleConfig::from_base_dir(temp_dir.path()),
        );
        MaintenanceScheduler::new(manager, RetentionPolicy::default(), 30)
    }

    #[test]
    fn test_job_intervals() {
        let policy = RetentionPolicy::builder()
            .backup_interval_hours(6)
            .build()
            .unwrap();
        assert_eq!(MaintenanceJob::CompressArchives.interval(&policy), DAY);
        assert_eq!(MaintenanceJob::ArchiveLogs.interval(&policy), DAY * 7);
        assert_eq!(MaintenanceJob::CreateBackup.interval(&policy), HOUR * 6);
        assert_eq!(MaintenanceJob::FullMaintenance.interval(&policy), DAY * 30);

        let zero = RetentionPolicy::builder()
            .backup_interval_hours(0)
            .build()
            .unwrap();
        assert_eq!(MaintenanceJob::CreateBackup.interval(&zero), HOUR);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let scheduler = memory_scheduler(&temp_dir);

        let status = scheduler.status();
        assert!(!status.running);
        assert_eq!(status.jobs.len(), 6);
        assert!(status.jobs.iter().all(|j| j.run_count == 0));

        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        // Second start is a no-op
        scheduler.start().unwrap();

        scheduler.stop().await;
        assert!(!scheduler.status().running);
        // Stopping twice is harmless
        scheduler.stop().await;
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let temp_dir = TempDir::new().unwrap();
        let scheduler = memory_scheduler(&temp_dir);
        assert!(matches!(scheduler.start(), Err(LifecycleError::Config(_))));
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_run_now_records_status() {
        let temp_dir = TempDir::new().unwrap();
        let scheduler = memory_scheduler(&temp_dir);

        let outcome = scheduler.run_now(MaintenanceJob::RetentionPolicy).await;
        assert_eq!(outcome, JobOutcome::Succeeded);
        assert_eq!(scheduler.manager().store().count_all().unwrap(), 1);

        let status = scheduler.status();
        let retention = status
            .jobs
            .iter()
            .find(|j| j.id == "retention_policy")
            .unwrap();
        assert_eq!(retention.run_count, 1);
        assert_eq!(retention.failure_count, 0);
        assert!(retention.last_run.is_some());
        assert_eq!(retention.last_outcome, Some(JobOutcome::Succeeded));
    }

    #[tokio::test]
    async fn test_update_policy_applies_to_next_run() {
        let temp_dir = TempDir::new().unwrap();
        let scheduler = memory_scheduler(&temp_dir);
        let keep_everything = RetentionPolicy::builder()
            .retention_days(365)
            .build()
            .unwrap();

        scheduler.update_policy(keep_everything);
        assert_eq!(scheduler.policy(), keep_everything);

        scheduler.run_now(MaintenanceJob::RetentionPolicy).await;
        assert_eq!(scheduler.manager().store().count_all().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = MockRecordStore::new();
        store
            .expect_delete_where()
            .times(3)
            .returning(|_| Err(LifecycleError::storage("database is locked")));
        let manager = LifecycleManager::new(
            store,
            FixedClock::new(Utc::now()),
            &LifecycleConfig::from_base_dir(temp_dir.path()),
        );
        let scheduler = MaintenanceScheduler::new(manager, RetentionPolicy::default(), 30)
            .with_retry_policy(quick_retry(3));

        let outcome = scheduler.run_now(MaintenanceJob::RetentionPolicy).await;
        match outcome {
            JobOutcome::Failed { error } => assert!(error.contains("database is locked")),
            other => panic!("expected failure, got {other:?}"),
        }

        let status = scheduler.status();
        let retention = &status.jobs[1];
        assert_eq!(retention.id, "retention_policy");
        assert_eq!(retention.run_count, 1);
        assert_eq!(retention.failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failures_are_not_retried() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = MockRecordStore::new();
        store
            .expect_delete_where()
            .times(1)
            .returning(|_| Err(LifecycleError::config("store opened read-only")));
        let manager = LifecycleManager::new(
            store,
            FixedClock::new(Utc::now()),
            &LifecycleConfig::from_base_dir(temp_dir.path()),
        );
        let scheduler = MaintenanceScheduler::new(manager, RetentionPolicy::default(), 30)
            .with_retry_policy(quick_retry(5));

        let outcome = scheduler.run_now(MaintenanceJob::RetentionPolicy).await;
        assert!(matches!(outcome, JobOutcome::Failed { .. }));
        assert_eq!(scheduler.status().jobs[1].failure_count, 1);
    }

    #[test]
    fn test_full_maintenance_failure_names_stages() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = MockRecordStore::new();
        store
            .expect_delete_where()
            .returning(|_| Err(LifecycleError::config("store opened read-only")));
        store.expect_select_where().returning(|_| Ok(Vec::new()));
        let manager = LifecycleManager::new(
            store,
            FixedClock::new(Utc::now()),
            &LifecycleConfig::from_base_dir(temp_dir.path()),
        );

        let err = execute(
            &manager,
            MaintenanceJob::FullMaintenance,
            &RetentionPolicy::default(),
            30,
        )
        .unwrap_err();
        match &err {
            LifecycleError::MaintenanceFailed(stages) => assert_eq!(stages, &vec!["retention"]),
            other => panic!("expected MaintenanceFailed, got {other:?}"),
        }
        assert_eq!(err.to_string(), "Maintenance stages failed: retention");
        assert!(err.is_permanent());
    }

    #[test]
    fn test_lifecycle_error_classification() {
        assert!(LifecycleError::storage("locked").is_transient());
        assert!(LifecycleError::config("bad").is_permanent());
        assert!(LifecycleError::invalid_backup("not a database").is_permanent());
    }
}
