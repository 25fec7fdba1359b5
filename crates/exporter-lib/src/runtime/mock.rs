//! Scriptable runtime for tests

use super::ContainerRuntime;
use crate::error::RuntimeError;
use crate::models::{EngineSnapshot, LifecycleEvent, RawSample, Workload};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// One scripted `stream_events` call: events to emit, then how it ends
///
/// `None` keeps the stream open until the receiver is dropped.
pub(crate) type StreamScript = (Vec<LifecycleEvent>, Option<RuntimeError>);

#[derive(Default)]
pub(crate) struct MockRuntime {
    workloads: Mutex<Vec<Workload>>,
    samples: Mutex<HashMap<String, RawSample>>,
    failing: Mutex<HashSet<String>>,
    slow: Mutex<HashMap<String, Duration>>,
    streams: Mutex<VecDeque<StreamScript>>,
    engine: Mutex<EngineSnapshot>,
    list_fails: AtomicBool,
    engine_fails: AtomicBool,
    pub list_calls: AtomicUsize,
    pub stats_calls: AtomicUsize,
    pub stream_calls: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workloads(workloads: Vec<Workload>) -> Self {
        let runtime = Self::new();
        runtime.set_workloads(workloads);
        runtime
    }

    pub fn set_workloads(&self, workloads: Vec<Workload>) {
        *self.workloads.lock().unwrap() = workloads;
    }

    pub fn set_sample(&self, id: &str, sample: RawSample) {
        self.samples.lock().unwrap().insert(id.to_string(), sample);
    }

    pub fn fail_stats(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn delay_stats(&self, id: &str, delay: Duration) {
        self.slow.lock().unwrap().insert(id.to_string(), delay);
    }

    pub fn fail_list(&self, fail: bool) {
        self.list_fails.store(fail, Ordering::SeqCst);
    }

    pub fn fail_engine(&self, fail: bool) {
        self.engine_fails.store(fail, Ordering::SeqCst);
    }

    pub fn clear_stats_failure(&self, id: &str) {
        self.failing.lock().unwrap().remove(id);
    }

    pub fn push_stream(&self, events: Vec<LifecycleEvent>, end: Option<RuntimeError>) {
        self.streams.lock().unwrap().push_back((events, end));
    }

    pub fn set_engine(&self, engine: EngineSnapshot) {
        *self.engine.lock().unwrap() = engine;
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_workloads(&self) -> Result<Vec<Workload>, RuntimeError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(RuntimeError::unavailable("mock listing failure"));
        }
        Ok(self.workloads.lock().unwrap().clone())
    }

    async fn fetch_stats(&self, workload_id: &str) -> Result<RawSample, RuntimeError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.slow.lock().unwrap().get(workload_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().unwrap().contains(workload_id) {
            return Err(RuntimeError::unavailable("mock stats failure"));
        }

        let known = self
            .workloads
            .lock()
            .unwrap()
            .iter()
            .any(|w| w.id == workload_id);
        if !known {
            return Err(RuntimeError::WorkloadNotFound(workload_id.to_string()));
        }

        let mut sample = self
            .samples
            .lock()
            .unwrap()
            .get(workload_id)
            .cloned()
            .unwrap_or_else(|| RawSample::at(chrono::Utc::now()));
        sample.timestamp = chrono::Utc::now();
        Ok(sample)
    }

    async fn stream_events(
        &self,
        sender: mpsc::Sender<LifecycleEvent>,
    ) -> Result<(), RuntimeError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);

        let script = self.streams.lock().unwrap().pop_front();
        let Some((events, end)) = script else {
            sender.closed().await;
            return Ok(());
        };

        for event in events {
            if sender.send(event).await.is_err() {
                return Ok(());
            }
        }

        match end {
            Some(err) => Err(err),
            None => {
                sender.closed().await;
                Ok(())
            }
        }
    }

    async fn fetch_engine_snapshot(&self) -> Result<EngineSnapshot, RuntimeError> {
        if self.engine_fails.load(Ordering::SeqCst) {
            return Err(RuntimeError::unavailable("mock engine failure"));
        }
        Ok(self.engine.lock().unwrap().clone())
    }
}
