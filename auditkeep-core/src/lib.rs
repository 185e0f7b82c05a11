/*!
# Auditkeep Core

Lifecycle management for an append-only audit log.

Audit records move through three tiers as they age:

- **Live**: rows in the record store (SQLite in production)
- **Archived**: JSON archive files, optionally gzip-compressed
- **Backed up**: point-in-time SQLite snapshots that can be restored

The [`LifecycleManager`] owns a [`RecordStore`], a [`Clock`] and the artifact
directories, and exposes one operation per stage: retention prune, archive,
compress, backup, restore, backup cleanup, full maintenance and statistics.

## Architecture

- Stages are synchronous and only talk to the store through its predicates
- Stores are adapters behind the [`RecordStore`] port, so tests run against
  [`MemoryRecordStore`] or a mock
- Artifacts are staged as hidden temp files and published atomically

## Usage

```rust
use auditkeep_core::{LifecycleConfig, LifecycleManager, MemoryRecordStore, RetentionPolicy, SystemClock};

# fn main() -> auditkeep_core::Result<()> {
let base = tempfile::tempdir().unwrap();
let config = LifecycleConfig::from_base_dir(base.path());
let manager = LifecycleManager::new(MemoryRecordStore::new(), SystemClock, &config);

let report = manager.run_full_maintenance(&RetentionPolicy::default(), config.backup_keep_days);
assert!(report.is_success());
# Ok(())
# }
```
*/

pub mod archive;
pub mod artifacts;
pub mod backup;
pub mod clock;
pub mod compactor;
pub mod compression;
pub mod config;
pub mod error;
pub mod janitor;
pub mod maintenance;
pub mod manager;
pub mod observability;
pub mod policy;
pub mod record;
pub mod retention;
#[cfg(feature = "scheduler")]
pub mod scheduler;
pub mod stats;
pub mod storage;

pub use archive::{read_archive, ArchiveResult};
pub use artifacts::ArtifactInfo;
pub use backup::{BackupResult, RestoreResult, RowOutcome};
pub use clock::{Clock, FixedClock, SystemClock};
pub use compactor::CompactionResult;
pub use compression::{ArchiveFormat, GzipLevel};
pub use config::LifecycleConfig;
pub use error::{LifecycleError, Result};
pub use janitor::CleanupResult;
pub use maintenance::{MaintenanceReport, StageOutcome};
pub use manager::LifecycleManager;
pub use observability::{init_default_observability, init_observability};
pub use policy::{RetentionPolicy, RetentionPolicyBuilder};
pub use record::{AuditAction, AuditRecord, AuditSeverity, StatePayload};
pub use retention::RetentionResult;
#[cfg(feature = "scheduler")]
pub use scheduler::{JobOutcome, JobStatus, MaintenanceJob, MaintenanceScheduler, SchedulerStatus};
pub use stats::{ArtifactStats, DatabaseStats, StorageStats};
pub use storage::{InsertOutcome, MemoryRecordStore, RecordFilter, RecordStore, SqliteRecordStore};

#[cfg(feature = "metrics")]
pub use observability::{gather_metrics, LifecycleMetrics};

#[cfg(test)]
mod error_tests;
