/*!
Retention policy: the time thresholds and size limits every lifecycle stage
is evaluated against.

A policy is an immutable value. Each operation receives the policy it should
use; nothing in this crate holds a process-wide policy.
*/

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{LifecycleError, Result};

pub const DEFAULT_RETENTION_DAYS: u32 = 90;
pub const DEFAULT_ARCHIVE_AFTER_DAYS: u32 = 30;
pub const DEFAULT_COMPRESS_AFTER_DAYS: u32 = 7;
pub const DEFAULT_MAX_LOG_SIZE_MB: u32 = 1000;
pub const DEFAULT_BACKUP_INTERVAL_HOURS: u32 = 24;

/// Validated retention policy.
///
/// Invariants enforced at construction:
/// - every field is a non-negative integer
/// - `archive_after_days <= retention_days`, otherwise retention would delete
///   records before they ever reach cold storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicyFields", into = "PolicyFields")]
pub struct RetentionPolicy {
    retention_days: u32,
    archive_after_days: u32,
    compress_after_days: u32,
    max_log_size_mb: u32,
    backup_interval_hours: u32,
}

impl RetentionPolicy {
    /// Start building a policy from the defaults
    ///
    /// # Example
    /// ```rust
    /// use auditkeep_core::RetentionPolicy;
    ///
    /// let policy = RetentionPolicy::builder()
    ///     .retention_days(180)
    ///     .archive_after_days(60)
    ///     .build()?;
    /// assert_eq!(policy.compress_after_days(), 7);
    ///
    /// assert!(RetentionPolicy::builder().retention_days(-1).build().is_err());
    /// # Ok::<(), auditkeep_core::LifecycleError>(())
    /// ```
    pub fn builder() -> RetentionPolicyBuilder {
        RetentionPolicyBuilder::default()
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    pub fn archive_after_days(&self) -> u32 {
        self.archive_after_days
    }

    pub fn compress_after_days(&self) -> u32 {
        self.compress_after_days
    }

    /// Soft cap on live-log size. Informational only.
    pub fn max_log_size_mb(&self) -> u32 {
        self.max_log_size_mb
    }

    /// Backup cadence consumed by the scheduler.
    pub fn backup_interval_hours(&self) -> u32 {
        self.backup_interval_hours
    }

    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        days_before(now, self.retention_days)
    }

    pub fn archive_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        days_before(now, self.archive_after_days)
    }

    pub fn compress_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        days_before(now, self.compress_after_days)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
            archive_after_days: DEFAULT_ARCHIVE_AFTER_DAYS,
            compress_after_days: DEFAULT_COMPRESS_AFTER_DAYS,
            max_log_size_mb: DEFAULT_MAX_LOG_SIZE_MB,
            backup_interval_hours: DEFAULT_BACKUP_INTERVAL_HOURS,
        }
    }
}

/// `now - days`, the boundary between the keep set and the process set.
///
/// Saturates at the earliest representable instant, so a window reaching past
/// chrono's date range selects nothing.
pub fn days_before(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Builder accepting raw signed values, validated in [`RetentionPolicyBuilder::build`].
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicyBuilder {
    retention_days: i64,
    archive_after_days: i64,
    compress_after_days: i64,
    max_log_size_mb: i64,
    backup_interval_hours: i64,
}

impl Default for RetentionPolicyBuilder {
    fn default() -> Self {
        RetentionPolicy::default().into()
    }
}

/// Start from an existing policy, e.g. to override a single threshold
impl From<RetentionPolicy> for RetentionPolicyBuilder {
    fn from(policy: RetentionPolicy) -> Self {
        Self {
            retention_days: policy.retention_days.into(),
            archive_after_days: policy.archive_after_days.into(),
            compress_after_days: policy.compress_after_days.into(),
            max_log_size_mb: policy.max_log_size_mb.into(),
            backup_interval_hours: policy.backup_interval_hours.into(),
        }
    }
}

impl RetentionPolicyBuilder {
    pub fn retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    pub fn archive_after_days(mut self, days: i64) -> Self {
        self.archive_after_days = days;
        self
    }

    pub fn compress_after_days(mut self, days: i64) -> Self {
        self.compress_after_days = days;
        self
    }

    pub fn max_log_size_mb(mut self, mb: i64) -> Self {
        self.max_log_size_mb = mb;
        self
    }

    pub fn backup_interval_hours(mut self, hours: i64) -> Self {
        self.backup_interval_hours = hours;
        self
    }

    /// Validate and produce the policy
    ///
    /// # Errors
    /// * `LifecycleError::InvalidPolicy` - a field is negative or too large,
    ///   or the archive threshold exceeds the retention window
    pub fn build(self) -> Result<RetentionPolicy> {
        let policy = RetentionPolicy {
            retention_days: non_negative("retention_days", self.retention_days)?,
            archive_after_days: non_negative("archive_after_days", self.archive_after_days)?,
            compress_after_days: non_negative("compress_after_days", self.compress_after_days)?,
            max_log_size_mb: non_negative("max_log_size_mb", self.max_log_size_mb)?,
            backup_interval_hours: non_negative(
                "backup_interval_hours",
                self.backup_interval_hours,
            )?,
        };

        if policy.archive_after_days > policy.retention_days {
            return Err(LifecycleError::invalid_policy(format!(
                "archive_after_days ({}) exceeds retention_days ({}); records would be deleted before they are archived",
                policy.archive_after_days, policy.retention_days
            )));
        }

        Ok(policy)
    }
}

fn non_negative(field: &str, value: i64) -> Result<u32> {
    if value < 0 {
        return Err(LifecycleError::invalid_policy(format!(
            "{field} must be non-negative, got {value}"
        )));
    }
    u32::try_from(value)
        .map_err(|_| LifecycleError::invalid_policy(format!("{field} is too large: {value}")))
}

/// Wire shape of a policy in configuration files. Missing fields take defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
struct PolicyFields {
    retention_days: i64,
    archive_after_days: i64,
    compress_after_days: i64,
    max_log_size_mb: i64,
    backup_interval_hours: i64,
}

impl Default for PolicyFields {
    fn default() -> Self {
        RetentionPolicy::default().into()
    }
}

impl TryFrom<PolicyFields> for RetentionPolicy {
    type Error = LifecycleError;

    fn try_from(fields: PolicyFields) -> Result<Self> {
        RetentionPolicy::builder()
            .retention_days(fields.retention_days)
            .archive_after_days(fields.archive_after_days)
            .compress_after_days(fields.compress_after_days)
            .max_log_size_mb(fields.max_log_size_mb)
            .backup_interval_hours(fields.backup_interval_hours)
            .build()
    }
}

impl From<RetentionPolicy> for PolicyFields {
    fn from(policy: RetentionPolicy) -> Self {
        Self {
            retention_days: policy.retention_days.into(),
            archive_after_days: policy.archive_after_days.into(),
            compress_after_days: policy.compress_after_days.into(),
            max_log_size_mb: policy.max_log_size_mb.into(),
            backup_interval_hours: policy.backup_interval_hours.into(),
        }
    }
}
