//! Container runtime contract
//!
//! The scheduler only talks to the runtime through [`ContainerRuntime`].
//! [`CgroupRuntime`] implements it on top of the cgroup v2 filesystem.

mod cgroup;
mod watcher;

#[cfg(test)]
pub(crate) mod mock;

pub use cgroup::{extract_container_id, CgroupRuntime};
pub use watcher::{CgroupWatcher, WatcherHandle};

use crate::error::RuntimeError;
use crate::models::{EngineSnapshot, LifecycleEvent, RawSample, Workload};
use tokio::sync::mpsc;

pub use async_trait::async_trait;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List the workloads currently running
    async fn list_workloads(&self) -> Result<Vec<Workload>, RuntimeError>;

    /// Fetch one raw sample for a workload
    async fn fetch_stats(&self, workload_id: &str) -> Result<RawSample, RuntimeError>;

    /// Push lifecycle events into `sender` until the stream breaks
    ///
    /// Returns `Ok(())` when the receiving side is gone and an error when the
    /// runtime side of the stream fails.
    async fn stream_events(
        &self,
        sender: mpsc::Sender<LifecycleEvent>,
    ) -> Result<(), RuntimeError>;

    /// Host-scoped engine counts
    async fn fetch_engine_snapshot(&self) -> Result<EngineSnapshot, RuntimeError>;
}
