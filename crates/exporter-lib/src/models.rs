//! Core data models for the exporter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A running container tracked by identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Opaque runtime id, stable for the workload's lifetime
    pub id: String,
    /// Display name without the leading `/`
    pub name: String,
    /// Image reference without the `@sha256:...` digest
    pub image: String,
    /// Free-form runtime labels
    pub labels: BTreeMap<String, String>,
}

impl Workload {
    pub fn new(id: impl Into<String>, name: impl AsRef<str>, image: impl AsRef<str>) -> Self {
        Self {
            id: id.into(),
            name: name.as_ref().trim_start_matches('/').to_string(),
            image: strip_image_digest(image.as_ref()).to_string(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }
}

/// Strip the content digest after `@` from an image reference
pub fn strip_image_digest(image: &str) -> &str {
    match image.find('@') {
        Some(idx) => &image[..idx],
        None => image,
    }
}

/// Cumulative CPU time in nanoseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuUsage {
    pub total: u64,
    pub user: u64,
    pub system: u64,
}

/// Memory usage and limit in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub usage: u64,
    pub limit: u64,
}

/// Cumulative block I/O bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoStats {
    pub read: u64,
    pub written: u64,
}

/// Network counters summed over all interfaces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_dropped: u64,
    pub rx_errors: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_dropped: u64,
    pub tx_errors: u64,
}

/// One block I/O entry as reported by the runtime, e.g. `{op: "Read", value: 4096}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlkioEntry {
    pub op: String,
    pub value: u64,
}

impl BlkioEntry {
    pub fn new(op: impl Into<String>, value: u64) -> Self {
        Self {
            op: op.into(),
            value,
        }
    }
}

/// Per-interface network counters as reported by the runtime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceStats {
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_dropped: u64,
    pub rx_errors: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_dropped: u64,
    pub tx_errors: u64,
}

/// One point-in-time measurement for a workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub cpu: CpuUsage,
    pub memory: MemoryUsage,
    pub io: IoStats,
    pub network: NetworkStats,
    pub timestamp: DateTime<Utc>,
}

impl RawSample {
    /// An all-zero sample taken at `timestamp`
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            cpu: CpuUsage::default(),
            memory: MemoryUsage::default(),
            io: IoStats::default(),
            network: NetworkStats::default(),
            timestamp,
        }
    }
}

/// Host-scoped engine counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub host: String,
    pub images: u64,
    pub containers: u64,
    pub containers_running: u64,
    pub containers_stopped: u64,
    pub containers_paused: u64,
}

/// Kind of workload lifecycle notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleKind {
    Start,
    Destroy,
}

/// A start/destroy notification from the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub workload_id: String,
    pub kind: LifecycleKind,
}

impl LifecycleEvent {
    pub fn start(workload_id: impl Into<String>) -> Self {
        Self {
            workload_id: workload_id.into(),
            kind: LifecycleKind::Start,
        }
    }

    pub fn destroy(workload_id: impl Into<String>) -> Self {
        Self {
            workload_id: workload_id.into(),
            kind: LifecycleKind::Destroy,
        }
    }
}
