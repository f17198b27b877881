//! Integration tests for the agent API endpoints

use alert_lib::{
    engine::{AlertEngine, AlertRule, EngineConfig},
    health::{components, HealthRegistry},
    http::{create_router, AppState},
    models::{Sample, SampleCount},
    observability::AlertMetrics,
    query::{QueryError, QueryFacade, SeriesSelector},
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use std::sync::Arc;
use tower::ServiceExt;

/// Every sensor reads hot; vibration never exceeds
struct HotSensors;

#[async_trait]
impl QueryFacade for HotSensors {
    async fn latest(&self, _selector: &SeriesSelector) -> Result<Option<Sample>, QueryError> {
        Ok(Some(Sample {
            value: 58.2,
            timestamp: Utc::now(),
        }))
    }

    async fn count_exceeding(
        &self,
        _selector: &SeriesSelector,
        _threshold: f64,
    ) -> Result<Option<SampleCount>, QueryError> {
        Ok(None)
    }
}

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let engine = Arc::new(AlertEngine::new(Arc::new(HotSensors), EngineConfig::default()));
    let state = Arc::new(AppState::new(health_registry, AlertMetrics::new(), engine));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    for name in components::ALL {
        assert!(health["components"][name].is_object(), "missing {name}");
    }
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::QUERY_BACKEND, "All 4 checks failed last cycle")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["query_backend"]["message"],
        "All 4 checks failed last cycle"
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::SCHEDULER, "Check loop stopped")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state) = setup_test_app().await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;

    state.metrics.inc_check("temp_critical");
    state.metrics.observe_check_latency("temp_critical", 0.002);
    state.metrics.inc_notification("slack", "delivered");

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("alert_agent_checks_total"));
    assert!(metrics_text.contains("alert_agent_check_latency_seconds_bucket"));
    assert!(metrics_text.contains("alert_agent_notifications_total"));
    assert!(metrics_text.contains("alert_agent_history_size"));
}

#[tokio::test]
async fn test_alert_history_empty() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get_json(app, "/api/v1/alerts").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hours"], 24);
    assert_eq!(body["total"], 0);
    assert!(body["alerts"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_alert_history_lists_fired_alerts() {
    let (app, state) = setup_test_app().await;
    let rule = AlertRule::defaults().remove(0);

    for sensor in ["S1", "S2"] {
        assert!(state.engine.check(&rule, sensor).await.is_some());
    }
    // Cooling down, not recorded again
    assert!(state.engine.check(&rule, "S1").await.is_none());

    let (status, body) = get_json(app, "/api/v1/alerts?hours=1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hours"], 1);
    assert_eq!(body["total"], 2);

    let alerts = body["alerts"].as_array().unwrap();
    assert_eq!(alerts[0]["sensor_id"], "S1");
    assert_eq!(alerts[0]["level"], "CRITICAL");
    assert_eq!(alerts[0]["rule"], "temp_critical");
    assert_eq!(alerts[0]["value"], 58.2);
    assert_eq!(alerts[1]["sensor_id"], "S2");
}

#[tokio::test]
async fn test_alert_history_rejects_bad_hours() {
    let (app, _state) = setup_test_app().await;

    let (status, _) = get(app.clone(), "/api/v1/alerts?hours=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(app.clone(), "/api/v1/alerts?hours=100000").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(app, "/api/v1/alerts?hours=soon").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
