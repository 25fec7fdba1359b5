//! Scrape-time bridge between the Prometheus registry and the live snapshot

use super::snapshot::MetricSet;
use arc_swap::ArcSwap;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::Registry;
use std::collections::HashMap;
use std::sync::Arc;

/// Collector that reads whichever [`MetricSet`] is current at scrape time
pub struct SnapshotCollector {
    snapshot: Arc<ArcSwap<MetricSet>>,
    desc: Desc,
}

impl SnapshotCollector {
    pub fn new(snapshot: Arc<ArcSwap<MetricSet>>) -> prometheus::Result<Self> {
        // Gauges come and go with every rebuild, so the registry only sees a
        // placeholder descriptor.
        let desc = Desc::new(
            "container_metrics_snapshot".to_string(),
            "Container metrics from the current snapshot".to_string(),
            Vec::new(),
            HashMap::new(),
        )?;

        Ok(Self { snapshot, desc })
    }

    /// Register into `registry`
    pub fn register(self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self))
    }
}

impl Collector for SnapshotCollector {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.snapshot.load().collect()
    }
}
