//! Metric set built for one workload population
//!
//! A [`MetricSet`] is immutable once built: its gauge descriptors and label
//! schema are fixed at build time. Gauge values and the latest engine
//! snapshot are the only things that change while it is live.

use super::gauge::{self, EngineGauge, Observation, WorkloadGauge};
use super::labels::{LabelFilter, LabelSchema};
use crate::error::MetricsError;
use crate::models::{EngineSnapshot, Workload};
use arc_swap::ArcSwapOption;
use prometheus::proto::MetricFamily;
use std::sync::Arc;
use tracing::warn;

/// Settings shared by every metric set of an exporter
#[derive(Debug, Clone)]
pub struct MetricSetOptions {
    /// Prefix applied to every exported metric name
    pub namespace: String,
    /// Host identifier used for the `engine_host` label of workload series
    pub host: String,
    /// Runtime labels eligible to become metric labels
    pub label_filter: LabelFilter,
}

impl Default for MetricSetOptions {
    fn default() -> Self {
        Self {
            namespace: "cntm".to_string(),
            host: String::new(),
            label_filter: LabelFilter::allow_all(),
        }
    }
}

pub struct MetricSet {
    workloads: Vec<Workload>,
    schema: LabelSchema,
    host: String,
    workload_gauges: Vec<WorkloadGauge>,
    engine_gauges: Vec<EngineGauge>,
    engine: ArcSwapOption<EngineSnapshot>,
}

impl MetricSet {
    /// Build gauges for `workloads`
    ///
    /// When `previous_engine` is given it is applied to the new host gauges
    /// right away so host metrics do not reset on every rebuild.
    pub fn build(
        options: &MetricSetOptions,
        workloads: Vec<Workload>,
        previous_engine: Option<Arc<EngineSnapshot>>,
    ) -> Result<Self, MetricsError> {
        let schema = LabelSchema::discover(&workloads, &options.label_filter);
        let label_names = schema.names();

        let workload_gauges = gauge::workload_gauge_specs()
            .into_iter()
            .map(|(name, help, mapper)| {
                WorkloadGauge::new(&options.namespace, name, help, &label_names, mapper)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let engine_gauges = gauge::engine_gauge_specs()
            .into_iter()
            .map(|(name, help, mapper)| EngineGauge::new(&options.namespace, name, help, mapper))
            .collect::<Result<Vec<_>, _>>()?;

        let set = Self {
            workloads,
            schema,
            host: options.host.clone(),
            workload_gauges,
            engine_gauges,
            engine: ArcSwapOption::empty(),
        };

        if let Some(engine) = previous_engine {
            set.record_engine(engine);
        }

        Ok(set)
    }

    /// An empty set, used before the first successful listing
    pub fn empty(options: &MetricSetOptions) -> Result<Self, MetricsError> {
        Self::build(options, Vec::new(), None)
    }

    pub fn workloads(&self) -> &[Workload] {
        &self.workloads
    }

    pub fn workload(&self, id: &str) -> Option<&Workload> {
        self.workloads.iter().find(|w| w.id == id)
    }

    pub fn schema(&self) -> &LabelSchema {
        &self.schema
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Set every per-workload gauge from one observation
    ///
    /// Returns the number of gauges updated.
    pub fn record(&self, workload: &Workload, observation: &Observation<'_>) -> usize {
        let values = self.schema.values_for(workload, &self.host);
        let mut updated = 0;

        for gauge in &self.workload_gauges {
            match gauge.set(&values, observation) {
                Ok(()) => updated += 1,
                Err(e) => warn!(
                    workload_id = %workload.id,
                    metric = gauge.name(),
                    error = %e,
                    "Failed to set gauge"
                ),
            }
        }

        updated
    }

    /// Remember and publish the latest engine snapshot
    pub fn record_engine(&self, snapshot: Arc<EngineSnapshot>) {
        for gauge in &self.engine_gauges {
            if let Err(e) = gauge.set(&snapshot) {
                warn!(metric = gauge.name(), error = %e, "Failed to set engine gauge");
            }
        }
        self.engine.store(Some(snapshot));
    }

    pub fn engine(&self) -> Option<Arc<EngineSnapshot>> {
        self.engine.load_full()
    }

    /// All metric families that currently carry at least one series
    pub fn collect(&self) -> Vec<MetricFamily> {
        let workload_families = self.workload_gauges.iter().flat_map(|g| g.collect());
        let engine_families = self.engine_gauges.iter().flat_map(|g| g.collect());

        workload_families
            .chain(engine_families)
            .filter(|family| !family.get_metric().is_empty())
            .collect()
    }

    /// Current value of a per-workload gauge, without creating the series
    pub fn workload_value(&self, metric: &str, workload_id: &str) -> Option<f64> {
        let workload = self.workload(workload_id)?;
        let gauge = self.workload_gauges.iter().find(|g| g.name() == metric)?;

        let expected: Vec<(&str, &str)> = self
            .schema
            .names()
            .into_iter()
            .zip(self.schema.values_for(workload, &self.host))
            .collect();

        gauge
            .collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .find(|m| {
                m.get_label().len() == expected.len()
                    && m.get_label().iter().all(|pair| {
                        expected
                            .iter()
                            .any(|(name, value)| *name == pair.get_name() && *value == pair.get_value())
                    })
            })
            .map(|m| m.get_gauge().get_value())
    }

    /// Current value of a host-scoped gauge
    pub fn engine_value(&self, metric: &str, host: &str) -> Option<f64> {
        let gauge = self.engine_gauges.iter().find(|g| g.name() == metric)?;

        gauge
            .collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .find(|m| m.get_label().iter().any(|pair| pair.get_value() == host))
            .map(|m| m.get_gauge().get_value())
    }
}

impl std::fmt::Debug for MetricSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSet")
            .field("workloads", &self.workloads.len())
            .field("labels", &self.schema.names())
            .field("engine", &self.engine())
            .finish()
    }
}
