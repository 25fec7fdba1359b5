//! Container metrics exporter library
//!
//! This crate provides the core functionality for:
//! - Per-workload and host metrics derived from container runtime samples
//! - Atomic replacement of the exported metric set on population changes
//! - Timer- and event-driven concurrent collection
//! - A cgroup v2 runtime adapter
//! - Health checks and self-observability

pub mod error;
pub mod exporter;
pub mod health;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod runtime;
pub mod scheduler;

pub use error::{MetricsError, RuntimeError};
pub use exporter::{Exporter, RebuildSummary};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use metrics::{LabelFilter, MetricSet, MetricSetOptions, SnapshotCollector, StatsCache};
pub use models::*;
pub use observability::{ExporterMetrics, StructuredLogger};
pub use runtime::{CgroupRuntime, ContainerRuntime};
pub use scheduler::{CollectionScheduler, CollectionSchedulerBuilder, CycleReport, SchedulerConfig};
