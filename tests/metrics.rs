// tests/metrics.rs
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusBuilder;
use tower::ServiceExt;

use news_aggregator::metrics::Metrics;

fn metrics() -> Metrics {
    // Built but not installed, so tests do not fight over the global recorder.
    let recorder = PrometheusBuilder::new().build_recorder();
    Metrics::from_handle(recorder.handle())
}

async fn get(path: &str) -> (StatusCode, String) {
    let resp = metrics()
        .router()
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    // axum::body::to_bytes requires an explicit limit
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn health_reports_ok() {
    let (status, body) = get("/health").await;
    assert_eq!(status, StatusCode::OK);
    let v: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["status"], "ok");
}

#[tokio::test]
async fn metrics_endpoint_renders_text() {
    let (status, _body) = get("/metrics").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let (status, _) = get("/decide").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
