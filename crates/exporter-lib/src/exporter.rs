//! The exporter service
//!
//! Owns the current [`MetricSet`] and the [`StatsCache`]. One instance is
//! created at startup and shared by `Arc` between the scheduler and the
//! scrape endpoint.

use crate::error::MetricsError;
use crate::metrics::{MetricSet, MetricSetOptions, Observation, SnapshotCollector, StatsCache};
use crate::models::{EngineSnapshot, RawSample, Workload};
use crate::observability::ExporterMetrics;
use arc_swap::{ArcSwap, ArcSwapOption};
use std::sync::Arc;
use tracing::debug;

/// Outcome of a snapshot rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildSummary {
    pub workloads: usize,
    pub labels: usize,
    /// Workloads whose gauges were restored from the cache
    pub replayed: usize,
}

pub struct Exporter {
    snapshot: Arc<ArcSwap<MetricSet>>,
    cache: StatsCache,
    options: MetricSetOptions,
    /// Latest engine counts, carried over into every rebuilt set
    engine: ArcSwapOption<EngineSnapshot>,
    metrics: ExporterMetrics,
}

impl Exporter {
    /// Create an exporter serving an empty snapshot
    pub fn new(options: MetricSetOptions) -> Result<Self, MetricsError> {
        let initial = MetricSet::empty(&options)?;

        Ok(Self {
            snapshot: Arc::new(ArcSwap::from_pointee(initial)),
            cache: StatsCache::new(),
            options,
            engine: ArcSwapOption::empty(),
            metrics: ExporterMetrics::new(),
        })
    }

    pub fn options(&self) -> &MetricSetOptions {
        &self.options
    }

    /// The live metric set
    pub fn current(&self) -> Arc<MetricSet> {
        self.snapshot.load_full()
    }

    pub fn cache(&self) -> &StatsCache {
        &self.cache
    }

    /// A scrape collector reading whichever set is live
    pub fn collector(&self) -> prometheus::Result<SnapshotCollector> {
        SnapshotCollector::new(self.snapshot.clone())
    }

    /// Build a new set for `workloads`, swap it in and replay cached samples
    pub fn rebuild(&self, workloads: Vec<Workload>) -> Result<RebuildSummary, MetricsError> {
        let previous_engine = self.engine.load_full();
        let set = Arc::new(MetricSet::build(
            &self.options,
            workloads,
            previous_engine.clone(),
        )?);

        self.snapshot.store(set.clone());

        // Engine counts recorded while the set was being built
        if let Some(latest) = self.engine.load_full() {
            let unchanged = previous_engine
                .as_ref()
                .is_some_and(|prev| Arc::ptr_eq(prev, &latest));
            if !unchanged {
                set.record_engine(latest);
            }
        }

        let replayed = self.replay_cached(&set);

        self.metrics.inc_snapshot_rebuilds();
        self.metrics.set_workloads_tracked(set.workloads().len());

        Ok(RebuildSummary {
            workloads: set.workloads().len(),
            labels: set.schema().len(),
            replayed,
        })
    }

    /// Cache a sample and set the gauges of the live set from it
    ///
    /// The set is loaded when the sample is applied, so a sample fetched
    /// before a rebuild lands in the rebuilt set. Returns `false` when the
    /// sample is older than the cached one and was dropped.
    pub fn record_sample(&self, workload_id: &str, sample: RawSample) -> bool {
        let stored = self.cache.record(workload_id, sample, |stats| {
            let set = self.snapshot.load();
            match set.workload(workload_id) {
                Some(workload) => {
                    set.record(
                        workload,
                        &Observation::new(&stats.latest, stats.previous.as_ref()),
                    );
                }
                None => debug!(
                    workload_id = %workload_id,
                    "Workload left the snapshot, sample cached only"
                ),
            }
        });

        if !stored {
            debug!(workload_id = %workload_id, "Dropped out-of-order sample");
        }
        stored
    }

    /// Remember the latest engine counts and publish them
    pub fn record_engine(&self, snapshot: EngineSnapshot) {
        let snapshot = Arc::new(snapshot);
        self.engine.store(Some(snapshot.clone()));
        self.snapshot.load().record_engine(snapshot);
    }

    /// Restore gauges of `set` from cached samples, without runtime calls
    ///
    /// Each entry is replayed while its key is held, so a concurrent
    /// `record_sample` for the same workload lands after the replay.
    fn replay_cached(&self, set: &MetricSet) -> usize {
        set.workloads()
            .iter()
            .filter_map(|workload| {
                self.cache.with_entry(&workload.id, |stats| {
                    set.record(
                        workload,
                        &Observation::new(&stats.latest, stats.previous.as_ref()),
                    );
                })
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn exporter() -> Exporter {
        Exporter::new(MetricSetOptions {
            host: "host-1".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn sample(offset_secs: i64, cpu_total: u64, memory: u64) -> RawSample {
        let mut sample = RawSample::at(base() + Duration::seconds(offset_secs));
        sample.cpu.total = cpu_total;
        sample.memory.usage = memory;
        sample.memory.limit = 1000;
        sample
    }

    #[test]
    fn test_starts_with_empty_snapshot() {
        let exporter = exporter();
        assert!(exporter.current().workloads().is_empty());
        assert!(exporter.cache().is_empty());
    }

    #[test]
    fn test_record_sample_sets_gauges_and_caches() {
        let exporter = exporter();
        exporter
            .rebuild(vec![Workload::new("a", "web", "nginx")])
            .unwrap();

        assert!(exporter.record_sample("a", sample(0, 0, 100)));
        assert!(exporter.record_sample("a", sample(2, 1_000_000_000, 250)));

        let set = exporter.current();
        assert_eq!(set.workload_value("memory_usage_bytes", "a"), Some(250.0));
        let percent = set.workload_value("cpu_usage_percent", "a").unwrap();
        assert!((percent - 50.0).abs() < 1e-6);
        assert_eq!(exporter.cache().get("a").unwrap().memory.usage, 250);
    }

    #[test]
    fn test_out_of_order_sample_is_dropped() {
        let exporter = exporter();
        exporter
            .rebuild(vec![Workload::new("a", "web", "nginx")])
            .unwrap();

        assert!(exporter.record_sample("a", sample(0, 0, 100)));
        assert!(exporter.record_sample("a", sample(10, 2_000_000_000, 500)));
        assert!(!exporter.record_sample("a", sample(5, 1_000_000_000, 300)));

        let set = exporter.current();
        assert_eq!(set.workload_value("memory_usage_bytes", "a"), Some(500.0));
        assert_eq!(set.workload_value("cpu_usage_total_seconds", "a"), Some(2.0));
        let percent = set.workload_value("cpu_usage_percent", "a").unwrap();
        assert!((percent - 20.0).abs() < 1e-9);

        let cached = exporter.cache().entry("a").unwrap();
        assert_eq!(cached.latest.memory.usage, 500);
        assert_eq!(cached.previous.unwrap().memory.usage, 100);
    }

    #[test]
    fn test_record_sample_for_unknown_workload_is_cached_only() {
        let exporter = exporter();
        assert!(exporter.record_sample("ghost", sample(0, 1, 1)));

        assert!(exporter.cache().get("ghost").is_some());
        assert!(exporter.current().collect().is_empty());
    }

    #[test]
    fn test_rebuild_preserves_cache_and_replays() {
        let exporter = exporter();
        exporter
            .rebuild(vec![
                Workload::new("a", "web", "nginx"),
                Workload::new("b", "db", "postgres"),
            ])
            .unwrap();
        let cached_a = sample(0, 10, 111);
        exporter.record_sample("a", cached_a.clone());
        exporter.record_sample("b", sample(0, 10, 222));

        let summary = exporter
            .rebuild(vec![
                Workload::new("a", "web", "nginx"),
                Workload::new("c", "cache", "redis"),
            ])
            .unwrap();

        assert_eq!(summary.workloads, 2);
        assert_eq!(summary.replayed, 1);
        assert_eq!(exporter.cache().len(), 2);
        assert_eq!(exporter.cache().get("a"), Some(cached_a));

        let set = exporter.current();
        assert_eq!(set.workload_value("memory_usage_bytes", "a"), Some(111.0));
        assert_eq!(set.workload_value("memory_usage_bytes", "c"), None);
        assert!(set.workload("b").is_none());
    }

    #[test]
    fn test_engine_survives_rebuild() {
        let exporter = exporter();
        exporter.record_engine(EngineSnapshot {
            host: "host-1".to_string(),
            containers: 5,
            containers_running: 4,
            containers_paused: 1,
            ..Default::default()
        });

        exporter
            .rebuild(vec![Workload::new("a", "web", "nginx")])
            .unwrap();

        let set = exporter.current();
        assert_eq!(set.engine_value("engine_num_containers", "host-1"), Some(5.0));
        assert_eq!(
            set.engine_value("engine_num_containers_paused", "host-1"),
            Some(1.0)
        );
    }

    #[test]
    fn test_old_snapshot_handle_stays_readable() {
        let exporter = exporter();
        exporter
            .rebuild(vec![Workload::new("a", "web", "nginx")])
            .unwrap();
        let old = exporter.current();

        exporter.rebuild(Vec::new()).unwrap();

        assert_eq!(old.workloads().len(), 1);
        assert!(exporter.current().workloads().is_empty());
    }
}
