//! Exported container metrics
//!
//! The [`MetricSet`] is the unit of atomic replacement: it is rebuilt from
//! scratch whenever the workload population changes and read lock-free by
//! the [`SnapshotCollector`] at scrape time.

pub mod cache;
pub mod calculator;
pub mod exposition;
pub mod gauge;
pub mod labels;
pub mod snapshot;

pub use cache::{CachedStats, StatsCache};
pub use exposition::SnapshotCollector;
pub use gauge::Observation;
pub use labels::{normalize_label_name, LabelFilter, LabelSchema};
pub use snapshot::{MetricSet, MetricSetOptions};
