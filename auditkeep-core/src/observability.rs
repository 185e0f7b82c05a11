/*!
Observability for the lifecycle engine.

- Structured logging setup (`tracing-subscriber` with `EnvFilter`)
- Prometheus metrics for stage outcomes, behind the `metrics` feature

Stage code calls the crate-internal recorders below unconditionally; without
the `metrics` feature they compile to nothing.
*/

#[cfg(feature = "metrics")]
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
#[cfg(feature = "metrics")]
use std::time::Instant;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{LifecycleError, Result};

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<LifecycleMetrics>> = OnceLock::new();

/// Counters and timings for lifecycle stages
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct LifecycleMetrics {
    pub records_pruned_total: IntCounter,
    pub records_archived_total: IntCounter,
    pub records_restored_total: IntCounter,
    pub corrupt_rows_total: IntCounter,
    pub archives_compressed_total: IntCounter,
    pub backups_created_total: IntCounter,
    pub backups_deleted_total: IntCounter,

    /// Labelled by stage name
    pub stage_failures_total: IntCounterVec,
    /// Labelled by stage name
    pub stage_duration_seconds: HistogramVec,

    registry: Registry,
}

#[cfg(feature = "metrics")]
impl LifecycleMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let counter = IntCounter::new(name, help).map_err(|e| {
                LifecycleError::config(format!("Failed to create {name} metric: {e}"))
            })?;
            registry.register(Box::new(counter.clone())).map_err(|e| {
                LifecycleError::config(format!("Failed to register {name}: {e}"))
            })?;
            Ok(counter)
        };

        let records_pruned_total = counter(
            "auditkeep_records_pruned_total",
            "Live records hard-deleted by retention",
        )?;
        let records_archived_total = counter(
            "auditkeep_records_archived_total",
            "Live records moved into archive files",
        )?;
        let records_restored_total = counter(
            "auditkeep_records_restored_total",
            "Records re-inserted from backups",
        )?;
        let corrupt_rows_total = counter(
            "auditkeep_corrupt_rows_total",
            "Backup rows skipped because they could not be decoded",
        )?;
        let archives_compressed_total = counter(
            "auditkeep_archives_compressed_total",
            "Plain archive files replaced by gzip copies",
        )?;
        let backups_created_total = counter(
            "auditkeep_backups_created_total",
            "Backup snapshots written",
        )?;
        let backups_deleted_total = counter(
            "auditkeep_backups_deleted_total",
            "Expired backup snapshots removed",
        )?;

        let stage_failures_total = IntCounterVec::new(
            Opts::new(
                "auditkeep_stage_failures_total",
                "Lifecycle stage runs that returned an error",
            ),
            &["stage"],
        )
        .map_err(|e| LifecycleError::config(format!("Failed to create stage_failures_total: {e}")))?;
        registry
            .register(Box::new(stage_failures_total.clone()))
            .map_err(|e| LifecycleError::config(format!("Failed to register stage_failures_total: {e}")))?;

        let stage_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "auditkeep_stage_duration_seconds",
                "Duration of lifecycle stage runs in seconds",
            ),
            &["stage"],
        )
        .map_err(|e| {
            LifecycleError::config(format!("Failed to create stage_duration_seconds: {e}"))
        })?;
        registry
            .register(Box::new(stage_duration_seconds.clone()))
            .map_err(|e| {
                LifecycleError::config(format!("Failed to register stage_duration_seconds: {e}"))
            })?;

        Ok(Self {
            records_pruned_total,
            records_archived_total,
            records_restored_total,
            corrupt_rows_total,
            archives_compressed_total,
            backups_created_total,
            backups_deleted_total,
            stage_failures_total,
            stage_duration_seconds,
            registry,
        })
    }

    /// Get or initialize the global metrics instance.
    ///
    /// Returns `None` (and logs once) if the registry could not be built.
    pub fn global() -> Option<&'static LifecycleMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to initialize lifecycle metrics");
                    None
                }
            })
            .as_ref()
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| LifecycleError::config(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| LifecycleError::config(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Render the global registry, or an empty string if metrics are unavailable
#[cfg(feature = "metrics")]
pub fn gather_metrics() -> Result<String> {
    match LifecycleMetrics::global() {
        Some(metrics) => metrics.gather_metrics(),
        None => Ok(String::new()),
    }
}

/// Which counter a stage bumps
#[derive(Debug, Clone, Copy)]
pub(crate) enum Counted {
    Pruned,
    Archived,
    Restored,
    CorruptRows,
    Compressed,
    BackupsCreated,
    BackupsDeleted,
}

#[cfg(feature = "metrics")]
pub(crate) fn record_count(kind: Counted, n: u64) {
    let Some(metrics) = LifecycleMetrics::global() else {
        return;
    };
    let counter = match kind {
        Counted::Pruned => &metrics.records_pruned_total,
        Counted::Archived => &metrics.records_archived_total,
        Counted::Restored => &metrics.records_restored_total,
        Counted::CorruptRows => &metrics.corrupt_rows_total,
        Counted::Compressed => &metrics.archives_compressed_total,
        Counted::BackupsCreated => &metrics.backups_created_total,
        Counted::BackupsDeleted => &metrics.backups_deleted_total,
    };
    counter.inc_by(n);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_count(_kind: Counted, _n: u64) {}

/// Times one stage run and records its outcome
pub(crate) struct StageTimer {
    #[cfg(feature = "metrics")]
    stage: &'static str,
    #[cfg(feature = "metrics")]
    start: Instant,
}

impl StageTimer {
    #[cfg(feature = "metrics")]
    pub(crate) fn start(stage: &'static str) -> Self {
        Self {
            stage,
            start: Instant::now(),
        }
    }

    #[cfg(not(feature = "metrics"))]
    pub(crate) fn start(_stage: &'static str) -> Self {
        Self {}
    }

    /// Record the elapsed time, counting a failure when `result` is an error
    pub(crate) fn observe<T>(self, result: &Result<T>) {
        self.record(result.is_err());
    }

    #[cfg(feature = "metrics")]
    fn record(self, failed: bool) {
        let Some(metrics) = LifecycleMetrics::global() else {
            return;
        };
        metrics
            .stage_duration_seconds
            .with_label_values(&[self.stage])
            .observe(self.start.elapsed().as_secs_f64());
        if failed {
            metrics
                .stage_failures_total
                .with_label_values(&[self.stage])
                .inc();
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn record(self, _failed: bool) {}
}

/// Initialize the global tracing subscriber
///
/// Log output goes to stderr so command results on stdout stay machine-readable.
/// `RUST_LOG` directives are honoured on top of the default level.
///
/// # Arguments
/// * `json` - Emit one JSON object per event instead of human-readable lines
/// * `verbose` - Default `auditkeep` targets to `debug` instead of `info`
pub fn init_observability(json: bool, verbose: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    LifecycleMetrics::global();

    let directive = if verbose {
        "auditkeep=debug"
    } else {
        "auditkeep=info"
    };
    let filter = EnvFilter::from_default_env().add_directive(
        directive
            .parse()
            .map_err(|e| LifecycleError::config(format!("Invalid log directive: {e}")))?,
    );

    let registry = TracingRegistry::default().with(filter);
    let installed = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false)
            .with_writer(std::io::stderr);
        set_global_default(registry.with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        set_global_default(registry.with(fmt_layer))
    };

    installed.map_err(|e| {
        LifecycleError::config(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("auditkeep observability initialized");
    Ok(())
}

/// Initialize observability with human-readable output at `info`
pub fn init_default_observability() -> Result<()> {
    init_observability(false, false)
}
