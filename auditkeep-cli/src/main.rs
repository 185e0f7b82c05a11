/*!
Auditkeep CLI - operator interface for the audit-log lifecycle manager.

One subcommand per lifecycle operation, listings of the archive and backup
directories, and a `daemon` mode running the maintenance scheduler until
interrupted. Operation results are printed to stdout as pretty JSON; logs go
to stderr.
*/

use anyhow::{bail, Context};
use auditkeep_core::{
    read_archive, ArchiveFormat, ArtifactInfo, AuditRecord, LifecycleConfig, LifecycleManager,
    MaintenanceScheduler, MemoryRecordStore, RetentionPolicy, RetentionPolicyBuilder,
    SystemClock,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "auditkeep")]
#[command(about = "Retention, archival and backup for audit logs")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// JSON configuration file
    #[arg(short, long, global = true, env = "AUDITKEEP_CONFIG")]
    config: Option<PathBuf>,

    /// Base directory holding archives/ and backups/ (ignored with --config)
    #[arg(short, long, global = true, env = "AUDITKEEP_BASE_DIR", default_value = ".")]
    base_dir: PathBuf,

    /// Live SQLite database
    #[arg(short, long, global = true, env = "AUDITKEEP_DATABASE")]
    database: Option<PathBuf>,

    /// Print collected Prometheus metrics to stderr before exiting
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show record counts and artifact totals
    Stats,
    /// Delete live records older than the retention window
    Retention {
        /// Override retention_days
        #[arg(long)]
        days: Option<i64>,
    },
    /// Move old live records into an archive file
    Archive {
        /// Override archive_after_days
        #[arg(long)]
        days: Option<i64>,
    },
    /// Gzip plain archive files older than the threshold
    Compress {
        /// Override compress_after_days
        #[arg(long)]
        days: Option<i64>,
    },
    /// Snapshot the live store into the backup directory
    Backup,
    /// Insert records from a backup snapshot, skipping ones already present
    Restore {
        /// Backup file
        file: PathBuf,
    },
    /// Delete backups older than the keep window
    Cleanup {
        /// Override backup_keep_days
        #[arg(long)]
        days: Option<u32>,
    },
    /// Run every stage once
    Maintenance {
        #[arg(long)]
        retention_days: Option<i64>,
        #[arg(long)]
        archive_days: Option<i64>,
        #[arg(long)]
        compress_days: Option<i64>,
        #[arg(long)]
        backup_keep_days: Option<u32>,
    },
    /// List archive files
    ListArchives,
    /// List backup snapshots
    ListBackups,
    /// Show the records inside an archive file
    InspectArchive {
        /// Archive file (.json or .json.gz)
        file: PathBuf,
        /// Maximum rows to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Print full records as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show the effective retention policy
    Policy,
    /// Run the maintenance scheduler until interrupted
    Daemon,
}

#[derive(Tabled)]
struct ArchiveRow {
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Format")]
    format: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Modified")]
    modified: String,
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "File")]
    file: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Modified")]
    modified: String,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "User")]
    user: String,
}

impl From<&AuditRecord> for RecordRow {
    fn from(record: &AuditRecord) -> Self {
        Self {
            timestamp: record.timestamp().format("%Y-%m-%d %H:%M:%S").to_string(),
            action: record.action().as_str().to_string(),
            severity: record.severity().as_str().to_string(),
            resource: format!("{}/{}", record.resource_type(), record.resource_id()),
            user: record.user_id().to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    auditkeep_core::init_observability(cli.json_logs, cli.verbose)?;

    let config = load_config(&cli)?;
    let print_metrics = cli.print_metrics;

    match cli.command {
        Commands::Stats => {
            let manager = open_manager(&config)?;
            print_json(&manager.storage_stats(&config.policy)?)?;
        }
        Commands::Retention { days } => {
            let policy = override_policy(&config.policy, |b| match days {
                Some(days) => b.retention_days(days),
                None => b,
            })?;
            print_json(&open_manager(&config)?.apply_retention(&policy)?)?;
        }
        Commands::Archive { days } => {
            let policy = override_policy(&config.policy, |b| match days {
                Some(days) => b.archive_after_days(days),
                None => b,
            })?;
            print_json(&open_manager(&config)?.archive(&policy)?)?;
        }
        Commands::Compress { days } => {
            let policy = override_policy(&config.policy, |b| match days {
                Some(days) => b.compress_after_days(days),
                None => b,
            })?;
            print_json(&artifact_manager(&config).compress_old_archives(&policy)?)?;
        }
        Commands::Backup => print_json(&open_manager(&config)?.create_backup()?)?,
        Commands::Restore { file } => {
            print_json(&open_manager(&config)?.restore_from_backup(&file)?)?
        }
        Commands::Cleanup { days } => {
            let keep_days = days.unwrap_or(config.backup_keep_days);
            print_json(&artifact_manager(&config).cleanup_old_backups(keep_days)?)?;
        }
        Commands::Maintenance {
            retention_days,
            archive_days,
            compress_days,
            backup_keep_days,
        } => {
            let policy = override_policy(&config.policy, |mut b| {
                if let Some(days) = retention_days {
                    b = b.retention_days(days);
                }
                if let Some(days) = archive_days {
                    b = b.archive_after_days(days);
                }
                if let Some(days) = compress_days {
                    b = b.compress_after_days(days);
                }
                b
            })?;
            let keep_days = backup_keep_days.unwrap_or(config.backup_keep_days);
            let report = open_manager(&config)?.run_full_maintenance(&policy, keep_days);
            print_json(&report)?;
            if !report.is_success() {
                bail!(
                    "maintenance finished with failed stages: {}",
                    report.failed_stages().join(", ")
                );
            }
        }
        Commands::ListArchives => list_archives(&config)?,
        Commands::ListBackups => list_backups(&config)?,
        Commands::InspectArchive { file, limit, json } => inspect_archive(&file, limit, json)?,
        Commands::Policy => print_json(&config.policy)?,
        Commands::Daemon => run_daemon(config).await?,
    }

    if print_metrics {
        eprintln!("{}", auditkeep_core::gather_metrics()?);
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<LifecycleConfig, anyhow::Error> {
    let mut config = match &cli.config {
        Some(path) => LifecycleConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => LifecycleConfig::from_base_dir(&cli.base_dir),
    };
    if let Some(database) = &cli.database {
        config = config.with_database(database);
    }
    config.validate()?;
    Ok(config)
}

/// Manager over the live database; fails when none is configured
fn open_manager(
    config: &LifecycleConfig,
) -> Result<LifecycleManager<auditkeep_core::SqliteRecordStore>, anyhow::Error> {
    if config.database_path.is_none() {
        bail!("no live database configured; pass --database or set AUDITKEEP_DATABASE");
    }
    Ok(LifecycleManager::open(config)?)
}

/// Manager for commands that only touch artifact directories
fn artifact_manager(config: &LifecycleConfig) -> LifecycleManager<MemoryRecordStore> {
    LifecycleManager::new(MemoryRecordStore::new(), SystemClock, config)
}

fn override_policy<F>(base: &RetentionPolicy, apply: F) -> Result<RetentionPolicy, anyhow::Error>
where
    F: FnOnce(RetentionPolicyBuilder) -> RetentionPolicyBuilder,
{
    Ok(apply(RetentionPolicyBuilder::from(*base)).build()?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), anyhow::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn list_archives(config: &LifecycleConfig) -> Result<(), anyhow::Error> {
    let files = artifact_manager(config).list_archives()?;
    if files.is_empty() {
        println!("No archives found in {}", config.archive_dir.display());
        return Ok(());
    }

    let rows: Vec<ArchiveRow> = files
        .iter()
        .map(|f| ArchiveRow {
            file: f.file_name(),
            format: ArchiveFormat::from_path(&f.path)
                .map(|format| format.algorithm_name().to_string())
                .unwrap_or_default(),
            size: format_size(f.size_bytes),
            modified: format_modified(f),
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

fn list_backups(config: &LifecycleConfig) -> Result<(), anyhow::Error> {
    let files = artifact_manager(config).list_backups()?;
    if files.is_empty() {
        println!("No backups found in {}", config.backup_dir.display());
        return Ok(());
    }

    let rows: Vec<BackupRow> = files
        .iter()
        .map(|f| BackupRow {
            file: f.file_name(),
            size: format_size(f.size_bytes),
            modified: format_modified(f),
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

fn inspect_archive(file: &Path, limit: usize, json: bool) -> Result<(), anyhow::Error> {
    let records = read_archive(file)
        .with_context(|| format!("reading archive {}", file.display()))?;
    info!(file = %file.display(), records = records.len(), "Loaded archive");

    if json {
        return print_json(&records.iter().take(limit).collect::<Vec<_>>());
    }

    println!("Archive: {}", file.display());
    println!("  Records: {}", records.len());
    if let (Some(first), Some(last)) = (records.first(), records.last()) {
        println!("  Oldest: {}", first.timestamp().format("%Y-%m-%d %H:%M:%S"));
        println!("  Newest: {}", last.timestamp().format("%Y-%m-%d %H:%M:%S"));
    }
    if records.is_empty() {
        return Ok(());
    }

    let rows: Vec<RecordRow> = records.iter().take(limit).map(RecordRow::from).collect();
    println!("{}", Table::new(rows));
    if records.len() > limit {
        println!("... {} more", records.len() - limit);
    }
    Ok(())
}

async fn run_daemon(config: LifecycleConfig) -> Result<(), anyhow::Error> {
    let manager = open_manager(&config)?;
    let scheduler = MaintenanceScheduler::new(manager, config.policy, config.backup_keep_days);
    scheduler.start()?;
    info!(archive_dir = %config.archive_dir.display(), "Daemon running; press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }

    scheduler.stop().await;
    print_json(&scheduler.status())
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_modified(file: &ArtifactInfo) -> String {
    file.modified
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_parse_maintenance_overrides() {
        let cli = Cli::try_parse_from([
            "auditkeep",
            "--database",
            "audit.sqlite",
            "maintenance",
            "--retention-days",
            "120",
            "--backup-keep-days",
            "14",
        ])
        .unwrap();
        assert_eq!(cli.database, Some(PathBuf::from("audit.sqlite")));
        match cli.command {
            Commands::Maintenance {
                retention_days,
                archive_days,
                backup_keep_days,
                ..
            } => {
                assert_eq!(retention_days, Some(120));
                assert_eq!(archive_days, None);
                assert_eq!(backup_keep_days, Some(14));
            }
            _ => panic!("expected maintenance command"),
        }
    }

    #[test]
    fn test_override_policy_validates() {
        let base = RetentionPolicy::default();
        let policy = override_policy(&base, |b| b.retention_days(120)).unwrap();
        assert_eq!(policy.retention_days(), 120);
        assert_eq!(policy.archive_after_days(), base.archive_after_days());

        assert!(override_policy(&base, |b| b.retention_days(-5)).is_err());
        assert!(override_policy(&base, |b| b.archive_after_days(500)).is_err());
    }

    #[test]
    fn test_config_from_base_dir_and_database_flag() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let base = temp_dir.path().to_string_lossy().into_owned();
        let cli = Cli::try_parse_from([
            "auditkeep",
            "--base-dir",
            base.as_str(),
            "--database",
            "live.sqlite",
            "stats",
        ])
        .unwrap();

        let config = load_config(&cli).unwrap();
        assert_eq!(config.archive_dir, temp_dir.path().join("archives").join("audit_logs"));
        assert_eq!(config.database_path, Some(PathBuf::from("live.sqlite")));
    }

    #[test]
    fn test_open_manager_requires_database() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = LifecycleConfig::from_base_dir(temp_dir.path());
        let err = open_manager(&config).err().unwrap();
        assert!(err.to_string().contains("--database"));
    }
}
