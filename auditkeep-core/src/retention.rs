//! Retention pruning: hard-delete live records older than the retention window.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::observability::{record_count, Counted, StageTimer};
use crate::storage::{RecordFilter, RecordStore};
use crate::{Clock, LifecycleManager, Result, RetentionPolicy};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionResult {
    pub deleted_count: u64,
    pub cutoff_date: DateTime<Utc>,
}

impl<S, C> LifecycleManager<S, C>
where
    S: RecordStore,
    C: Clock,
{
    /// Delete every live record with `timestamp < now - retention_days`
    ///
    /// Deletion is a single store predicate, so records are never archived
    /// first; run [`LifecycleManager::archive`] before this to keep them.
    pub fn apply_retention(&self, policy: &RetentionPolicy) -> Result<RetentionResult> {
        let timer = StageTimer::start("retention");
        let result = self.prune(policy);
        timer.observe(&result);
        result
    }

    fn prune(&self, policy: &RetentionPolicy) -> Result<RetentionResult> {
        let cutoff_date = policy.retention_cutoff(self.clock.now());
        let deleted_count = self
            .store
            .delete_where(&RecordFilter::OlderThan(cutoff_date))?;

        record_count(Counted::Pruned, deleted_count);
        info!(
            deleted_count,
            cutoff = %cutoff_date,
            retention_days = policy.retention_days(),
            "Applied retention policy"
        );

        Ok(RetentionResult {
            deleted_count,
            cutoff_date,
        })
    }
}
