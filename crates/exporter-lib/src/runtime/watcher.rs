//! Lifecycle events from filesystem notifications
//!
//! Container cgroup directories appear when a container starts and are
//! removed when it is destroyed, so watching the hierarchy is enough to
//! drive population changes.

use super::cgroup::extract_container_id;
use crate::error::RuntimeError;
use crate::models::LifecycleEvent;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Watches a cgroup hierarchy for container directories
pub struct CgroupWatcher {
    root: PathBuf,
}

/// Keeps the underlying watcher alive; stops watching when dropped
pub struct WatcherHandle {
    _watcher: RecommendedWatcher,
}

impl CgroupWatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Start watching, bridging notify's callback thread into tokio
    pub fn start(
        &self,
    ) -> Result<(WatcherHandle, mpsc::UnboundedReceiver<notify::Result<Event>>)> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )
        .context("Failed to create filesystem watcher")?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", self.root.display()))?;
        info!(path = %self.root.display(), "Watching cgroup hierarchy");

        Ok((WatcherHandle { _watcher: watcher }, rx))
    }

    /// Forward lifecycle events into `sender` until either side fails
    ///
    /// Returns `Ok(())` once `sender` is closed.
    pub async fn forward(self, sender: mpsc::Sender<LifecycleEvent>) -> Result<(), RuntimeError> {
        let (_handle, mut rx) = self
            .start()
            .map_err(|e| RuntimeError::unavailable(format!("{e:#}")))?;

        loop {
            let event = match rx.recv().await {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Err(RuntimeError::unavailable(e)),
                None => return Err(RuntimeError::unavailable("watcher channel closed")),
            };

            for lifecycle in translate(&event) {
                debug!(
                    workload_id = %lifecycle.workload_id,
                    kind = ?lifecycle.kind,
                    "Container lifecycle event"
                );
                if sender.send(lifecycle).await.is_err() {
                    debug!("Lifecycle receiver dropped, stopping watcher");
                    return Ok(());
                }
            }
        }
    }
}

/// Map a filesystem event to lifecycle events for container directories
pub fn translate(event: &Event) -> Vec<LifecycleEvent> {
    let build: fn(String) -> LifecycleEvent = match event.kind {
        EventKind::Create(_) => LifecycleEvent::start,
        EventKind::Remove(_) => LifecycleEvent::destroy,
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter_map(|path| container_id_of(path))
        .map(build)
        .collect()
}

fn container_id_of(path: &Path) -> Option<String> {
    extract_container_id(&path.file_name()?.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LifecycleKind;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use std::time::Duration;
    use tempfile::TempDir;

    const ID: &str = "abc123def456789012345678901234567890123456789012345678901234abcd";

    #[test]
    fn test_translate_create_and_remove() {
        let path = PathBuf::from(format!("/sys/fs/cgroup/system.slice/docker-{ID}.scope"));

        let created = Event::new(EventKind::Create(CreateKind::Folder)).add_path(path.clone());
        assert_eq!(translate(&created), vec![LifecycleEvent::start(ID)]);

        let removed = Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(path);
        assert_eq!(translate(&removed), vec![LifecycleEvent::destroy(ID)]);
    }

    #[test]
    fn test_translate_ignores_other_paths_and_kinds() {
        let slice = Event::new(EventKind::Create(CreateKind::Folder))
            .add_path(PathBuf::from("/sys/fs/cgroup/system.slice/cron.service"));
        assert!(translate(&slice).is_empty());

        let modified = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from(format!("/sys/fs/cgroup/{ID}")));
        assert!(translate(&modified).is_empty());
    }

    #[tokio::test]
    async fn test_forward_reports_new_container_directory() {
        let root = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(16);

        let watcher = CgroupWatcher::new(root.path());
        let task = tokio::spawn(watcher.forward(tx));
        tokio::time::sleep(Duration::from_millis(200)).await;

        std::fs::create_dir(root.path().join(ID)).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.workload_id, ID);
        assert_eq!(event.kind, LifecycleKind::Start);

        drop(rx);
        task.abort();
    }

    #[tokio::test]
    async fn test_forward_missing_root_is_unavailable() {
        let (tx, _rx) = mpsc::channel(1);
        let err = CgroupWatcher::new("/nonexistent/cgroup/root")
            .forward(tx)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Unavailable(_)));
    }
}
