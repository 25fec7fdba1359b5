//! Self-observability for the exporter
//!
//! Provides:
//! - Prometheus metrics about the exporter itself (cycle latency, errors, rebuilds)
//! - Structured JSON logging of lifecycle milestones with tracing

use crate::models::LifecycleKind;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for collection cycle latency (in seconds)
const CYCLE_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance, `None` if registration failed
static GLOBAL_METRICS: OnceLock<Option<ExporterMetricsInner>> = OnceLock::new();

struct ExporterMetricsInner {
    collection_duration_seconds: Histogram,
    collection_errors: IntCounter,
    workloads_tracked: IntGauge,
    snapshot_rebuilds: IntCounter,
    lifecycle_events: IntCounterVec,
    event_stream_restarts: IntCounter,
}

impl ExporterMetricsInner {
    fn register() -> prometheus::Result<Self> {
        Ok(Self {
            collection_duration_seconds: register_histogram!(
                "container_metrics_exporter_collection_duration_seconds",
                "Duration of one collection cycle over all workloads",
                CYCLE_BUCKETS.to_vec()
            )?,
            collection_errors: register_int_counter!(
                "container_metrics_exporter_collection_errors_total",
                "Failed per-workload stats fetches"
            )?,
            workloads_tracked: register_int_gauge!(
                "container_metrics_exporter_workloads_tracked",
                "Workloads in the current snapshot"
            )?,
            snapshot_rebuilds: register_int_counter!(
                "container_metrics_exporter_snapshot_rebuilds_total",
                "Snapshot rebuilds after a population change"
            )?,
            lifecycle_events: register_int_counter_vec!(
                "container_metrics_exporter_lifecycle_events_total",
                "Lifecycle events received from the runtime",
                &["kind"]
            )?,
            event_stream_restarts: register_int_counter!(
                "container_metrics_exporter_event_stream_restarts_total",
                "Restarts of the runtime lifecycle event stream"
            )?,
        })
    }
}

/// Handle to the exporter's own metrics
///
/// Cheap to clone; every handle shares the same registered metrics. If
/// registration failed the handle records nothing.
#[derive(Clone)]
pub struct ExporterMetrics {
    _private: (),
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ExporterMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(|| match ExporterMetricsInner::register() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(error = %e, "Failed to register exporter metrics");
                None
            }
        });
        Self { _private: () }
    }

    fn inner(&self) -> Option<&ExporterMetricsInner> {
        GLOBAL_METRICS.get().and_then(Option::as_ref)
    }

    pub fn observe_collection_duration(&self, duration_secs: f64) {
        if let Some(m) = self.inner() {
            m.collection_duration_seconds.observe(duration_secs);
        }
    }

    pub fn add_collection_errors(&self, count: u64) {
        if let Some(m) = self.inner() {
            m.collection_errors.inc_by(count);
        }
    }

    pub fn set_workloads_tracked(&self, count: usize) {
        if let Some(m) = self.inner() {
            m.workloads_tracked.set(count as i64);
        }
    }

    pub fn inc_snapshot_rebuilds(&self) {
        if let Some(m) = self.inner() {
            m.snapshot_rebuilds.inc();
        }
    }

    pub fn inc_lifecycle_event(&self, kind: LifecycleKind) {
        let label = match kind {
            LifecycleKind::Start => "start",
            LifecycleKind::Destroy => "destroy",
        };
        if let Some(m) = self.inner() {
            m.lifecycle_events.with_label_values(&[label]).inc();
        }
    }

    pub fn inc_event_stream_restarts(&self) {
        if let Some(m) = self.inner() {
            m.event_stream_restarts.inc();
        }
    }
}

/// Structured logger for exporter milestones
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    host: String,
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn log_startup(&self, version: &str, port: u16, interval_secs: u64) {
        info!(
            event = "exporter_started",
            host = %self.host,
            version = %version,
            port = port,
            interval_secs = interval_secs,
            "Container metrics exporter started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "exporter_shutdown",
            host = %self.host,
            reason = %reason,
            "Container metrics exporter shutting down"
        );
    }

    /// Log a snapshot rebuild
    pub fn log_rebuild(&self, workloads: usize, labels: usize, replayed: usize) {
        info!(
            event = "snapshot_rebuilt",
            host = %self.host,
            workloads = workloads,
            labels = labels,
            replayed = replayed,
            "Rebuilt metric snapshot"
        );
    }

    /// Log the loss of the lifecycle event stream
    pub fn log_event_stream_lost(&self, error: &str, restarts_left: u32) {
        if restarts_left > 0 {
            warn!(
                event = "event_stream_lost",
                host = %self.host,
                error = %error,
                restarts_left = restarts_left,
                "Lifecycle event stream ended, restarting"
            );
        } else {
            warn!(
                event = "event_stream_lost",
                host = %self.host,
                error = %error,
                restarts_left = 0,
                "Lifecycle event stream ended, continuing timer-only"
            );
        }
    }
}
