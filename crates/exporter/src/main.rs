//! Container metrics exporter
//!
//! Observes the containers of one host through the cgroup v2 hierarchy and
//! serves their resource usage for Prometheus scraping.

use anyhow::{Context, Result};
use container_metrics::{api, config::ExporterConfig};
use exporter_lib::{
    CgroupRuntime, CollectionSchedulerBuilder, ContainerRuntime, Exporter, HealthRegistry,
    StructuredLogger,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = ExporterConfig::load()?;
    info!(host = %config.host, namespace = %config.namespace, "Exporter configured");

    let logger = StructuredLogger::new(&config.host);
    logger.log_startup(EXPORTER_VERSION, config.port, config.interval_secs);

    let exporter = Arc::new(
        Exporter::new(config.metric_set_options()?).context("Failed to create metric set")?,
    );

    let registry = prometheus::default_registry().clone();
    exporter
        .collector()
        .and_then(|collector| collector.register(&registry))
        .context("Failed to register snapshot collector")?;

    let runtime = CgroupRuntime::with_proc_root(&config.cgroup_root, &config.proc_root, &config.host);
    if !runtime.is_available().await {
        warn!(
            cgroup_root = %config.cgroup_root.display(),
            "No cgroup v2 hierarchy found, collection will report errors until it appears"
        );
    }
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(runtime);

    let health = HealthRegistry::new();
    let scheduler_config = config.scheduler_config();
    let scheduler = CollectionSchedulerBuilder::new()
        .runtime(runtime)
        .exporter(exporter)
        .health(health.clone())
        .interval(scheduler_config.interval)
        .timeout(scheduler_config.timeout)
        .event_restarts(scheduler_config.event_restarts)
        .cache_ttl(scheduler_config.cache_ttl)
        .build()?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(health, registry));
    let mut api_handle = tokio::spawn(api::serve(config.port, app_state, shutdown_tx.subscribe()));

    let reason = tokio::select! {
        signal = shutdown_signal() => signal?,
        served = &mut api_handle => {
            match served {
                Ok(Ok(())) => "API server stopped",
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    "API server failed"
                }
                Err(e) => {
                    error!(error = %e, "API server task panicked");
                    "API server panicked"
                }
            }
        }
    };

    logger.log_shutdown(reason);
    let _ = shutdown_tx.send(());

    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Scheduler task panicked");
    }
    if !api_handle.is_finished() {
        match api_handle.await {
            Ok(Err(e)) => error!(error = %e, "API server failed during shutdown"),
            Err(e) => error!(error = %e, "API server task panicked"),
            Ok(Ok(())) => {}
        }
    }

    Ok(())
}

/// Wait for SIGINT or SIGTERM, returning which one arrived
async fn shutdown_signal() -> Result<&'static str> {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to install Ctrl+C handler")?;
        Ok::<_, anyhow::Error>("SIGINT received")
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, anyhow::Error>("SIGTERM received")
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<&'static str>>();

    tokio::select! {
        reason = ctrl_c => reason,
        reason = terminate => reason,
    }
}
