//! HTTP surface: liveness, readiness and metrics exposition.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use ovlstats::api::create_router;
use ovlstats::Metrics;
use tower::ServiceExt;

async fn get(uri: &str) -> (StatusCode, Option<String>, String) {
    let response = create_router()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get("content-type")
        .map(|v| v.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, content_type, String::from_utf8(body.to_vec()).unwrap())
}

/// Value of the sample of `family` carrying all `labels`.
fn sample<'a>(body: &'a str, family: &str, labels: &[&str]) -> &'a str {
    body.lines()
        .find(|line| {
            line.starts_with(&format!("{}{{", family)) && labels.iter().all(|l| line.contains(l))
        })
        .and_then(|line| line.rsplit(' ').next())
        .unwrap_or_else(|| panic!("no {} sample with {:?}", family, labels))
}

#[tokio::test]
async fn test_health_endpoint() {
    let (status, _, body) = get("/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_ready_endpoint() {
    let (status, _, body) = get("/ready").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ready");
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_market_gauges() {
    Metrics::position_buckets("API/USD", &[2, 1, 0, 0, 0]);
    Metrics::upnl_unknown("API/USD");

    let (status, content_type, body) = get("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/plain"));
    assert_eq!(sample(&body, "ovl_position_bucket", &[r#"market="API/USD""#, r#"bucket="0-10""#]), "2");
    assert_eq!(sample(&body, "ovl_position_bucket", &[r#"market="API/USD""#, r#"bucket="10-20""#]), "1");
    assert_eq!(sample(&body, "ovl_upnl_profit", &[r#"market="API/USD""#]), "NaN");
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (status, _, _) = get("/positions").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
