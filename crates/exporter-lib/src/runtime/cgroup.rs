//! cgroup v2 runtime adapter
//!
//! Reads workload statistics straight from the unified hierarchy:
//! - cpu.stat for cumulative CPU time
//! - memory.current / memory.max for usage and limit
//! - io.stat for block I/O bytes
//! - /proc/<pid>/net/dev of a member process for network counters

use super::watcher::CgroupWatcher;
use super::ContainerRuntime;
use crate::error::RuntimeError;
use crate::metrics::calculator;
use crate::models::{
    BlkioEntry, CpuUsage, EngineSnapshot, InterfaceStats, LifecycleEvent, MemoryUsage, RawSample,
    Workload,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::mpsc;
use tracing::debug;

const CONTAINER_ID_LEN: usize = 64;
const SHORT_ID_LEN: usize = 12;

/// Runtime backed by the cgroup v2 filesystem
pub struct CgroupRuntime {
    cgroup_root: PathBuf,
    proc_root: PathBuf,
    host: String,
    /// Container id -> cgroup directory, refreshed on every listing
    paths: DashMap<String, PathBuf>,
}

impl CgroupRuntime {
    pub fn new(cgroup_root: impl Into<PathBuf>, host: impl Into<String>) -> Self {
        Self::with_proc_root(cgroup_root, "/proc", host)
    }

    /// Create a runtime with a custom proc path (for testing)
    pub fn with_proc_root(
        cgroup_root: impl Into<PathBuf>,
        proc_root: impl Into<PathBuf>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            proc_root: proc_root.into(),
            host: host.into(),
            paths: DashMap::new(),
        }
    }

    /// Whether the root looks like a cgroup v2 mount
    pub async fn is_available(&self) -> bool {
        fs::metadata(self.cgroup_root.join("cgroup.controllers"))
            .await
            .is_ok()
    }

    /// Parse cpu.stat; values are reported in microseconds
    pub fn parse_cpu_stat(content: &str) -> CpuUsage {
        let mut cpu = CpuUsage::default();

        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let nanos = value.parse::<u64>().unwrap_or(0).saturating_mul(1_000);
            match key {
                "usage_usec" => cpu.total = nanos,
                "user_usec" => cpu.user = nanos,
                "system_usec" => cpu.system = nanos,
                _ => {}
            }
        }

        cpu
    }

    /// Parse io.stat into per-device read/write entries
    ///
    /// Lines look like `8:0 rbytes=4096 wbytes=0 rios=1 wios=0 dbytes=0 dios=0`.
    pub fn parse_io_stat(content: &str) -> Vec<BlkioEntry> {
        let mut entries = Vec::new();

        for line in content.lines() {
            for field in line.split_whitespace().skip(1) {
                let Some((key, value)) = field.split_once('=') else {
                    continue;
                };
                let Ok(value) = value.parse::<u64>() else {
                    continue;
                };
                match key {
                    "rbytes" => entries.push(BlkioEntry::new("Read", value)),
                    "wbytes" => entries.push(BlkioEntry::new("Write", value)),
                    _ => {}
                }
            }
        }

        entries
    }

    /// Parse /proc/<pid>/net/dev, skipping the loopback interface
    pub fn parse_net_dev(content: &str) -> Vec<InterfaceStats> {
        content
            .lines()
            .filter_map(|line| {
                let (name, counters) = line.split_once(':')?;
                if name.trim() == "lo" {
                    return None;
                }

                let values: Vec<u64> = counters
                    .split_whitespace()
                    .map(|v| v.parse().unwrap_or(0))
                    .collect();
                if values.len() < 12 {
                    return None;
                }

                Some(InterfaceStats {
                    rx_bytes: values[0],
                    rx_packets: values[1],
                    rx_errors: values[2],
                    rx_dropped: values[3],
                    tx_bytes: values[8],
                    tx_packets: values[9],
                    tx_errors: values[10],
                    tx_dropped: values[11],
                })
            })
            .collect()
    }

    /// Parse `MemTotal` from /proc/meminfo, in bytes
    pub fn parse_mem_total(content: &str) -> Option<u64> {
        content.lines().find_map(|line| {
            let rest = line.strip_prefix("MemTotal:")?;
            let kib: u64 = rest.split_whitespace().next()?.parse().ok()?;
            Some(kib.saturating_mul(1024))
        })
    }

    /// Recursively scan for container cgroups
    async fn scan_cgroup_dir(path: &Path) -> Result<Vec<(String, PathBuf)>> {
        let mut found = Vec::new();
        let mut entries = fs::read_dir(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let entry_path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();

            if let Some(id) = extract_container_id(&name) {
                if fs::metadata(entry_path.join("cpu.stat")).await.is_ok() {
                    found.push((id, entry_path.clone()));
                }
            }

            // Directories can vanish mid-scan
            if let Ok(nested) = Box::pin(Self::scan_cgroup_dir(&entry_path)).await {
                found.extend(nested);
            }
        }

        Ok(found)
    }

    /// Scan the hierarchy and refresh the id -> path map
    async fn refresh(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut found = Self::scan_cgroup_dir(&self.cgroup_root).await?;
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found.dedup_by(|a, b| a.0 == b.0);

        self.paths.retain(|id, _| found.iter().any(|(f, _)| f == id));
        for (id, path) in &found {
            self.paths.insert(id.clone(), path.clone());
        }

        Ok(found)
    }

    async fn read_memory(&self, cgroup: &Path) -> Result<MemoryUsage> {
        let usage = read_u64(&cgroup.join("memory.current")).await?;

        let limit = match fs::read_to_string(cgroup.join("memory.max")).await {
            Ok(raw) if raw.trim() == "max" => self.host_memory().await,
            Ok(raw) => raw.trim().parse().unwrap_or(0),
            Err(_) => 0,
        };

        Ok(MemoryUsage { usage, limit })
    }

    async fn host_memory(&self) -> u64 {
        fs::read_to_string(self.proc_root.join("meminfo"))
            .await
            .ok()
            .and_then(|content| Self::parse_mem_total(&content))
            .unwrap_or(0)
    }

    /// Network counters of the first process in the cgroup
    async fn read_network(&self, cgroup: &Path) -> Vec<InterfaceStats> {
        let Ok(procs) = fs::read_to_string(cgroup.join("cgroup.procs")).await else {
            return Vec::new();
        };
        let Some(pid) = procs.lines().map(str::trim).find(|l| !l.is_empty()) else {
            return Vec::new();
        };

        match fs::read_to_string(self.proc_root.join(pid).join("net/dev")).await {
            Ok(content) => Self::parse_net_dev(&content),
            Err(e) => {
                debug!(pid = %pid, error = %e, "No network stats for process");
                Vec::new()
            }
        }
    }

    async fn read_sample(&self, cgroup: &Path) -> Result<RawSample> {
        let cpu_stat = fs::read_to_string(cgroup.join("cpu.stat"))
            .await
            .with_context(|| format!("Failed to read cpu.stat in {}", cgroup.display()))?;
        let memory = self.read_memory(cgroup).await?;
        let io_stat = fs::read_to_string(cgroup.join("io.stat"))
            .await
            .unwrap_or_default();
        let interfaces = self.read_network(cgroup).await;

        Ok(RawSample {
            cpu: Self::parse_cpu_stat(&cpu_stat),
            memory,
            io: calculator::aggregate_io(&Self::parse_io_stat(&io_stat)),
            network: calculator::aggregate_network(&interfaces),
            timestamp: chrono::Utc::now(),
        })
    }

    async fn is_frozen(cgroup: &Path) -> bool {
        fs::read_to_string(cgroup.join("cgroup.freeze"))
            .await
            .map(|v| v.trim() == "1")
            .unwrap_or(false)
    }
}

#[async_trait]
impl ContainerRuntime for CgroupRuntime {
    async fn list_workloads(&self) -> Result<Vec<Workload>, RuntimeError> {
        let found = self.refresh().await.map_err(RuntimeError::unavailable)?;

        Ok(found
            .into_iter()
            .map(|(id, _)| {
                let name = id[..SHORT_ID_LEN].to_string();
                Workload::new(id, name, "")
            })
            .collect())
    }

    async fn fetch_stats(&self, workload_id: &str) -> Result<RawSample, RuntimeError> {
        let cgroup = self
            .paths
            .get(workload_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| RuntimeError::WorkloadNotFound(workload_id.to_string()))?;

        let err = match self.read_sample(&cgroup).await {
            Ok(sample) => return Ok(sample),
            Err(e) => e,
        };

        if fs::metadata(&cgroup).await.is_err() {
            self.paths.remove(workload_id);
            return Err(RuntimeError::WorkloadNotFound(workload_id.to_string()));
        }
        Err(RuntimeError::unavailable(format!("{err:#}")))
    }

    async fn stream_events(
        &self,
        sender: mpsc::Sender<LifecycleEvent>,
    ) -> Result<(), RuntimeError> {
        CgroupWatcher::new(&self.cgroup_root).forward(sender).await
    }

    async fn fetch_engine_snapshot(&self) -> Result<EngineSnapshot, RuntimeError> {
        let found = self.refresh().await.map_err(RuntimeError::unavailable)?;

        let mut paused = 0u64;
        for (_, path) in &found {
            if Self::is_frozen(path).await {
                paused += 1;
            }
        }
        let containers = found.len() as u64;

        Ok(EngineSnapshot {
            host: self.host.clone(),
            images: 0,
            containers,
            containers_running: containers - paused,
            containers_stopped: 0,
            containers_paused: paused,
        })
    }
}

/// Extract a 64-hex-digit container id from a cgroup directory name
///
/// Handles the formats used by the common runtimes:
/// - plain: `<id>`
/// - Docker with systemd: `docker-<id>.scope`
/// - containerd: `cri-containerd-<id>.scope`
/// - CRI-O: `crio-<id>.scope`
pub fn extract_container_id(dir_name: &str) -> Option<String> {
    let name = dir_name.strip_suffix(".scope").unwrap_or(dir_name);
    let id = ["docker-", "cri-containerd-", "crio-"]
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name);

    if id.len() == CONTAINER_ID_LEN && id.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(id.to_string())
    } else {
        None
    }
}

async fn read_u64(path: &Path) -> Result<u64> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    content
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {}", path.display()))
}
