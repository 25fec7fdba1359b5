//! Integration tests for the exporter API endpoints

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use container_metrics::api::{create_router, AppState};
use exporter_lib::{
    health::components, CgroupRuntime, CollectionSchedulerBuilder, Exporter, HealthRegistry,
    MetricSetOptions, RawSample, Workload,
};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const CONTAINER_ID: &str = "abc123def456789012345678901234567890123456789012345678901234abcd";

fn options() -> MetricSetOptions {
    MetricSetOptions {
        host: "test-host".to_string(),
        ..Default::default()
    }
}

async fn setup_test_app() -> (Router, Arc<AppState>, Arc<Exporter>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::COLLECTOR).await;
    health_registry.register(components::RUNTIME).await;

    let exporter = Arc::new(Exporter::new(options()).unwrap());
    let registry = Registry::new();
    exporter.collector().unwrap().register(&registry).unwrap();

    let state = Arc::new(AppState::new(health_registry, registry));
    let router = create_router(state.clone());

    (router, state, exporter)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    (status, content_type, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state, _exporter) = setup_test_app().await;

    let (status, _, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_event_stream_degraded() {
    let (app, state, _exporter) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::EVENT_STREAM, "timer-only collection")
        .await;

    let (status, _, body) = get(app, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["event_stream"]["message"],
        "timer-only collection"
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state, _exporter) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::RUNTIME, "cgroup hierarchy missing")
        .await;

    let (status, _, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let health: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_before_and_after_first_snapshot() {
    let (app, state, _exporter) = setup_test_app().await;

    let (status, _, body) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready();

    let (status, _, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    let readiness: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_empty_snapshot() {
    let (app, _state, _exporter) = setup_test_app().await;

    let (status, content_type, body) = get(app, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/plain; version=0.0.4"));
    assert!(!body.contains("cntm_"));
}

#[tokio::test]
async fn test_metrics_exposes_workload_gauges() {
    let (app, _state, exporter) = setup_test_app().await;

    exporter
        .rebuild(vec![
            Workload::new("a", "/web", "nginx:1.25@sha256:abcdef").with_label("com.example.tier", "front")
        ])
        .unwrap();

    let mut sample = RawSample::at(chrono::Utc::now());
    sample.memory.usage = 512;
    sample.memory.limit = 2048;
    exporter.record_sample("a", sample);

    let (status, _, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    let line = body
        .lines()
        .find(|l| l.starts_with("cntm_memory_usage_percent{"))
        .expect("memory percent series missing");
    assert!(line.contains("container_name=\"web\""));
    assert!(line.contains("container_image=\"nginx:1.25\""));
    assert!(line.contains("engine_host=\"test-host\""));
    assert!(line.contains("com_example_tier=\"front\""));
    assert!(line.ends_with(" 25"));

    assert!(body.contains("# TYPE cntm_cpu_usage_total_seconds gauge"));
}

#[tokio::test]
async fn test_metrics_end_to_end_from_cgroup_fixture() {
    let cgroups = tempfile::TempDir::new().unwrap();
    let procs = tempfile::TempDir::new().unwrap();

    let dir = cgroups
        .path()
        .join("system.slice")
        .join(format!("docker-{CONTAINER_ID}.scope"));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("cpu.stat"), "usage_usec 2000000\nuser_usec 1500000\nsystem_usec 500000\n").unwrap();
    std::fs::write(dir.join("memory.current"), "1024\n").unwrap();
    std::fs::write(dir.join("memory.max"), "4096\n").unwrap();

    let (app, state, exporter) = setup_test_app().await;
    let runtime = Arc::new(CgroupRuntime::with_proc_root(
        cgroups.path(),
        procs.path(),
        "test-host",
    ));

    let mut scheduler = CollectionSchedulerBuilder::new()
        .runtime(runtime)
        .exporter(exporter)
        .health(state.health_registry.clone())
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    assert!(scheduler.relist().await);
    let report = scheduler.collect_all().await;
    assert_eq!(report.succeeded, 1);
    assert!(state.health_registry.is_ready());

    let (_, _, body) = get(app, "/metrics").await;

    let cpu = body
        .lines()
        .find(|l| l.starts_with("cntm_cpu_usage_total_seconds{"))
        .expect("cpu series missing");
    assert!(cpu.contains("container_name=\"abc123def456\""));
    assert!(cpu.ends_with(" 2"));

    assert!(body.contains("cntm_memory_usage_percent{"));
    assert!(body.contains("cntm_engine_num_containers{engine_host=\"test-host\"} 1"));
}
