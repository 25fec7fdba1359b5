//! Gauge descriptors
//!
//! Every exported quantity is a [`GaugeVec`] paired with a function that
//! extracts its value from a sample (or from an engine snapshot for the
//! host-scoped gauges).

use super::calculator;
use crate::error::MetricsError;
use crate::models::{EngineSnapshot, RawSample};
use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};

/// The sample being recorded plus the one before it, if any
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub current: &'a RawSample,
    pub previous: Option<&'a RawSample>,
}

impl<'a> Observation<'a> {
    pub fn new(current: &'a RawSample, previous: Option<&'a RawSample>) -> Self {
        Self { current, previous }
    }
}

pub type SampleMapper = fn(&Observation<'_>) -> f64;
pub type EngineMapper = fn(&EngineSnapshot) -> f64;

/// A per-workload gauge keyed by the snapshot's label schema
pub struct WorkloadGauge {
    name: &'static str,
    vec: GaugeVec,
    mapper: SampleMapper,
}

impl WorkloadGauge {
    pub fn new(
        namespace: &str,
        name: &'static str,
        help: &str,
        labels: &[&str],
        mapper: SampleMapper,
    ) -> Result<Self, MetricsError> {
        let vec = GaugeVec::new(Opts::new(name, help).namespace(namespace), labels).map_err(
            |source| MetricsError::Gauge {
                name: name.to_string(),
                source,
            },
        )?;

        Ok(Self { name, vec, mapper })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Set the series identified by `label_values` from the observation
    pub fn set(
        &self,
        label_values: &[&str],
        observation: &Observation<'_>,
    ) -> Result<(), prometheus::Error> {
        let value = (self.mapper)(observation);
        self.vec
            .get_metric_with_label_values(label_values)?
            .set(value);
        Ok(())
    }

    pub fn collect(&self) -> Vec<MetricFamily> {
        self.vec.collect()
    }
}

/// A host-scoped gauge labeled only by `engine_host`
pub struct EngineGauge {
    name: &'static str,
    vec: GaugeVec,
    mapper: EngineMapper,
}

impl EngineGauge {
    pub fn new(
        namespace: &str,
        name: &'static str,
        help: &str,
        mapper: EngineMapper,
    ) -> Result<Self, MetricsError> {
        let vec = GaugeVec::new(
            Opts::new(name, help).namespace(namespace),
            &[super::labels::ENGINE_HOST],
        )
        .map_err(|source| MetricsError::Gauge {
            name: name.to_string(),
            source,
        })?;

        Ok(Self { name, vec, mapper })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn set(&self, snapshot: &EngineSnapshot) -> Result<(), prometheus::Error> {
        let value = (self.mapper)(snapshot);
        self.vec
            .get_metric_with_label_values(&[snapshot.host.as_str()])?
            .set(value);
        Ok(())
    }

    pub fn collect(&self) -> Vec<MetricFamily> {
        self.vec.collect()
    }
}

/// Name, help text and extractor of every per-workload gauge
pub fn workload_gauge_specs() -> Vec<(&'static str, &'static str, SampleMapper)> {
    let specs: [(&'static str, &'static str, SampleMapper); 19] = [
        ("cpu_usage_total_seconds", "Total CPU usage", |o| {
            calculator::nanos_to_seconds(o.current.cpu.total)
        }),
        ("cpu_usage_system_seconds", "CPU usage in system mode", |o| {
            calculator::nanos_to_seconds(o.current.cpu.system)
        }),
        ("cpu_usage_user_seconds", "CPU usage in user mode", |o| {
            calculator::nanos_to_seconds(o.current.cpu.user)
        }),
        ("cpu_usage_percent", "CPU usage in percent", |o| {
            calculator::cpu_percent(o.current, o.previous)
        }),
        ("memory_total_bytes", "Total memory available", |o| {
            o.current.memory.limit as f64
        }),
        ("memory_usage_bytes", "Memory used", |o| {
            o.current.memory.usage as f64
        }),
        ("memory_usage_percent", "Memory used in percent", |o| {
            calculator::memory_percent(o.current.memory.usage, o.current.memory.limit)
        }),
        ("memory_free_bytes", "Memory still available", |o| {
            calculator::free_memory(o.current.memory.usage, o.current.memory.limit)
        }),
        ("memory_free_percent", "Memory still available in percent", |o| {
            calculator::free_memory_percent(o.current.memory.usage, o.current.memory.limit)
        }),
        ("io_read_bytes", "I/O bytes read", |o| o.current.io.read as f64),
        ("io_write_bytes", "I/O bytes written", |o| {
            o.current.io.written as f64
        }),
        ("net_rx_bytes", "Network bytes received", |o| {
            o.current.network.rx_bytes as f64
        }),
        ("net_rx_packets", "Network packets received", |o| {
            o.current.network.rx_packets as f64
        }),
        ("net_rx_dropped", "Network inbound packets dropped", |o| {
            o.current.network.rx_dropped as f64
        }),
        ("net_rx_errors", "Network errors on receive", |o| {
            o.current.network.rx_errors as f64
        }),
        ("net_tx_bytes", "Network bytes sent", |o| {
            o.current.network.tx_bytes as f64
        }),
        ("net_tx_packets", "Network packets sent", |o| {
            o.current.network.tx_packets as f64
        }),
        ("net_tx_dropped", "Network outbound packets dropped", |o| {
            o.current.network.tx_dropped as f64
        }),
        ("net_tx_errors", "Network errors on send", |o| {
            o.current.network.tx_errors as f64
        }),
    ];

    specs.to_vec()
}

/// Name, help text and extractor of every host-scoped gauge
pub fn engine_gauge_specs() -> Vec<(&'static str, &'static str, EngineMapper)> {
    let specs: [(&'static str, &'static str, EngineMapper); 5] = [
        ("engine_num_images", "Number of images", |e| e.images as f64),
        ("engine_num_containers", "Number of containers", |e| {
            e.containers as f64
        }),
        (
            "engine_num_containers_running",
            "Number of running containers",
            |e| e.containers_running as f64,
        ),
        (
            "engine_num_containers_stopped",
            "Number of stopped containers",
            |e| e.containers_stopped as f64,
        ),
        (
            "engine_num_containers_paused",
            "Number of paused containers",
            |e| e.containers_paused as f64,
        ),
    ];

    specs.to_vec()
}
