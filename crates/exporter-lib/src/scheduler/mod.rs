//! Collection scheduler
//!
//! Drives collection from two independent triggers: a fixed-interval timer
//! that recollects every workload of the current snapshot, and runtime
//! lifecycle events that rebuild the snapshot from a fresh listing. Both
//! meet in a single `tokio::select!` so rebuilds never run concurrently.

mod population;


pub use population::merge_population;

use crate::error::RuntimeError;
use crate::exporter::Exporter;
use crate::health::{components, HealthRegistry};
use crate::models::LifecycleEvent;
use crate::observability::{ExporterMetrics, StructuredLogger};
use crate::runtime::ContainerRuntime;
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Configuration for the collection scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Timer trigger interval (default: 5 seconds)
    pub interval: Duration,
    /// Upper bound for every runtime call (default: 30 seconds)
    pub timeout: Duration,
    /// Restarts of a failed event stream before going timer-only (default: 1)
    pub event_restarts: u32,
    /// Pause before restarting the event stream (default: 1 second)
    pub restart_backoff: Duration,
    /// Drop cache entries older than this on every tick (default: never)
    pub cache_ttl: Option<Duration>,
    /// Lifecycle channel buffer size
    pub event_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
            event_restarts: 1,
            restart_backoff: Duration::from_secs(1),
            cache_ttl: None,
            event_buffer: 256,
        }
    }
}

/// Results from a collection cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub succeeded: usize,
    pub failed: usize,
    pub engine_refreshed: bool,
}

/// Bound a runtime call by `limit`, reporting a timeout as unavailability
async fn bounded<T, F>(limit: Duration, what: &'static str, call: F) -> Result<T, RuntimeError>
where
    F: Future<Output = Result<T, RuntimeError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RuntimeError::unavailable(format!(
            "{what} timed out after {:.1}s",
            limit.as_secs_f64()
        ))),
    }
}

/// Shared handles of one collection cycle
#[derive(Clone)]
struct CycleContext {
    runtime: Arc<dyn ContainerRuntime>,
    exporter: Arc<Exporter>,
    health: HealthRegistry,
    metrics: ExporterMetrics,
    timeout: Duration,
}

impl CycleContext {
    /// Collect every workload of the current snapshot concurrently
    async fn collect_all(self) -> CycleReport {
        let start = Instant::now();
        let engine_task = tokio::spawn(self.clone().refresh_engine());

        let mut tasks = JoinSet::new();
        for workload in self.exporter.current().workloads() {
            let ctx = self.clone();
            let id = workload.id.clone();
            tasks.spawn(async move {
                let result = ctx.collect_workload(&id).await;
                (id, result)
            });
        }

        let mut report = CycleReport::default();
        let mut unavailable = 0usize;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.succeeded += 1,
                Ok((id, Err(e))) if e.is_not_found() => {
                    report.failed += 1;
                    debug!(workload_id = %id, error = %e, "Workload gone before stats fetch");
                }
                Ok((id, Err(e))) => {
                    report.failed += 1;
                    unavailable += 1;
                    warn!(workload_id = %id, error = %e, "Failed to collect workload stats");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(error = %e, "Workload collection task panicked");
                }
            }
        }

        report.engine_refreshed = match engine_task.await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                error!(error = %e, "Engine refresh task panicked");
                false
            }
        };

        let elapsed = start.elapsed();
        self.metrics.observe_collection_duration(elapsed.as_secs_f64());
        self.metrics.add_collection_errors(report.failed as u64);

        let attempted = report.succeeded + report.failed;
        if unavailable == 0 && report.engine_refreshed {
            self.health.set_healthy(components::COLLECTOR).await;
        } else if report.succeeded == 0 && unavailable == attempted && !report.engine_refreshed {
            self.health
                .set_unhealthy(
                    components::COLLECTOR,
                    "runtime unreachable: every stats fetch and the engine refresh failed",
                )
                .await;
        } else {
            let reason = if unavailable > 0 {
                format!("{unavailable} of {attempted} stats fetches failing")
            } else {
                "engine refresh failing".to_string()
            };
            self.health.set_degraded(components::COLLECTOR, reason).await;
        }

        debug!(
            succeeded = report.succeeded,
            failed = report.failed,
            engine_refreshed = report.engine_refreshed,
            elapsed_ms = elapsed.as_millis() as u64,
            "Collection cycle complete"
        );

        report
    }

    async fn collect_workload(&self, id: &str) -> Result<(), RuntimeError> {
        let sample = bounded(self.timeout, "stats fetch", self.runtime.fetch_stats(id)).await?;
        self.exporter.record_sample(id, sample);
        Ok(())
    }

    async fn refresh_engine(self) -> bool {
        let call = self.runtime.fetch_engine_snapshot();
        match bounded(self.timeout, "engine snapshot", call).await {
            Ok(engine) => {
                self.exporter.record_engine(engine);
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh engine snapshot");
                false
            }
        }
    }
}

/// Keeps the lifecycle stream alive with a bounded number of restarts
struct EventListener {
    runtime: Arc<dyn ContainerRuntime>,
    health: HealthRegistry,
    metrics: ExporterMetrics,
    logger: StructuredLogger,
    restarts: u32,
    backoff: Duration,
}

impl EventListener {
    /// Runs until the receiver is gone or the restarts are used up;
    /// dropping `sender` then tells the scheduler to go timer-only
    async fn run(self, sender: mpsc::Sender<LifecycleEvent>) {
        let mut restarts_left = self.restarts;

        loop {
            match self.runtime.stream_events(sender.clone()).await {
                Ok(()) => {
                    debug!("Lifecycle receiver closed, stopping event listener");
                    return;
                }
                Err(e) => {
                    self.logger
                        .log_event_stream_lost(&e.to_string(), restarts_left);

                    if restarts_left == 0 {
                        self.health
                            .set_degraded(
                                components::EVENT_STREAM,
                                format!("timer-only collection: {e}"),
                            )
                            .await;
                        return;
                    }

                    restarts_left -= 1;
                    self.metrics.inc_event_stream_restarts();
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }
}

/// Timer- and event-driven collection over one exporter
pub struct CollectionScheduler {
    ctx: CycleContext,
    logger: StructuredLogger,
    config: SchedulerConfig,
    /// The population needs a re-list before the next collection
    stale: bool,
    /// No lifecycle events arrive, so every tick re-lists
    timer_only: bool,
}

impl CollectionScheduler {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        exporter: Arc<Exporter>,
        health: HealthRegistry,
        config: SchedulerConfig,
    ) -> Self {
        let logger = StructuredLogger::new(exporter.options().host.clone());

        Self {
            ctx: CycleContext {
                runtime,
                exporter,
                health,
                metrics: ExporterMetrics::new(),
                timeout: config.timeout,
            },
            logger,
            config,
            stale: true,
            timer_only: false,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Re-list workloads, merge with the current population and rebuild
    ///
    /// On failure the current snapshot stays in place and the population is
    /// marked stale so the next tick retries.
    pub async fn relist(&mut self) -> bool {
        let listing = self.ctx.runtime.list_workloads();
        let fresh = match bounded(self.config.timeout, "workload listing", listing).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(error = %e, "Failed to list workloads, keeping current snapshot");
                self.stale = true;
                self.ctx
                    .health
                    .set_degraded(components::RUNTIME, e.to_string())
                    .await;
                return false;
            }
        };

        let merged = merge_population(self.ctx.exporter.current().workloads(), fresh);

        match self.ctx.exporter.rebuild(merged) {
            Ok(summary) => {
                self.logger
                    .log_rebuild(summary.workloads, summary.labels, summary.replayed);
                self.stale = false;
                self.ctx.health.set_healthy(components::RUNTIME).await;
                self.ctx.health.set_ready();
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to rebuild metric snapshot");
                self.stale = true;
                false
            }
        }
    }

    /// React to a lifecycle event by rebuilding the snapshot
    pub async fn handle_event(&mut self, event: LifecycleEvent) -> bool {
        self.ctx.metrics.inc_lifecycle_event(event.kind);
        debug!(
            workload_id = %event.workload_id,
            kind = ?event.kind,
            "Lifecycle event, re-listing workloads"
        );
        self.relist().await
    }

    /// Run one collection cycle and wait for it
    pub async fn collect_all(&self) -> CycleReport {
        self.ctx.clone().collect_all().await
    }

    async fn on_tick(&mut self, cycles: &mut JoinSet<CycleReport>) {
        if self.stale || self.timer_only {
            self.relist().await;
        }

        if let Some(ttl) = self.config.cache_ttl {
            let pruned = self.ctx.exporter.cache().prune(ttl);
            if pruned > 0 {
                debug!(pruned = pruned, "Pruned stale cache entries");
            }
        }

        // Cycles may overlap; the cache rejects out-of-order samples
        cycles.spawn(self.ctx.clone().collect_all());
    }

    fn event_listener(&self) -> EventListener {
        EventListener {
            runtime: self.ctx.runtime.clone(),
            health: self.ctx.health.clone(),
            metrics: self.ctx.metrics.clone(),
            logger: self.logger.clone(),
            restarts: self.config.event_restarts,
            backoff: self.config.restart_backoff,
        }
    }

    /// Run until `shutdown` fires
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            timeout_secs = self.config.timeout.as_secs_f64(),
            event_restarts = self.config.event_restarts,
            "Starting collection scheduler"
        );

        self.ctx.health.register(components::COLLECTOR).await;
        self.ctx.health.register(components::EVENT_STREAM).await;

        if !self.relist().await {
            warn!("Initial workload listing failed, starting with an empty snapshot");
        }

        let (event_tx, mut event_rx) = mpsc::channel(self.config.event_buffer);
        let listener = tokio::spawn(self.event_listener().run(event_tx));

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = JoinSet::new();
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.on_tick(&mut cycles).await;
                }
                event = event_rx.recv(), if events_open => match event {
                    Some(event) => {
                        // A burst of events needs only one re-list
                        let mut coalesced = 0usize;
                        while let Ok(extra) = event_rx.try_recv() {
                            self.ctx.metrics.inc_lifecycle_event(extra.kind);
                            coalesced += 1;
                        }
                        if coalesced > 0 {
                            debug!(coalesced = coalesced, "Coalesced lifecycle events");
                        }
                        self.handle_event(event).await;
                    }
                    None => {
                        events_open = false;
                        self.timer_only = true;
                        self.stale = true;
                        warn!("Lifecycle events unavailable, re-listing on every tick");
                    }
                },
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Collection cycle panicked");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down collection scheduler");
                    break;
                }
            }
        }

        listener.abort();
        cycles.shutdown().await;
    }
}

/// Builder for the collection scheduler
pub struct CollectionSchedulerBuilder {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    exporter: Option<Arc<Exporter>>,
    health: HealthRegistry,
    config: SchedulerConfig,
}

impl CollectionSchedulerBuilder {
    pub fn new() -> Self {
        Self {
            runtime: None,
            exporter: None,
            health: HealthRegistry::new(),
            config: SchedulerConfig::default(),
        }
    }

    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn exporter(mut self, exporter: Arc<Exporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn event_restarts(mut self, restarts: u32) -> Self {
        self.config.event_restarts = restarts;
        self
    }

    pub fn restart_backoff(mut self, backoff: Duration) -> Self {
        self.config.restart_backoff = backoff;
        self
    }

    /// Prune cache entries older than `ttl`; `None` disables pruning
    pub fn cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn build(self) -> Result<CollectionScheduler> {
        let runtime = self
            .runtime
            .ok_or_else(|| anyhow::anyhow!("Runtime is required"))?;
        let exporter = self
            .exporter
            .ok_or_else(|| anyhow::anyhow!("Exporter is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Collection interval must be positive");
        }

        Ok(CollectionScheduler::new(
            runtime,
            exporter,
            self.health,
            self.config,
        ))
    }
}

impl Default for CollectionSchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
