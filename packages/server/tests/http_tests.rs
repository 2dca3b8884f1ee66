//! HTTP surface tests, driving the router directly.
#![cfg(unix)]

mod common;

use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use common::*;
use harvest_server::server::build_app;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_and_units() {
    let ctx = TestHarness::new(Duration::from_secs(3600)).unwrap();
    let app = build_app(ctx.supervisor.clone());

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_runs"], 0);

    let (status, body) = send(&app, "GET", "/units", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["units"].as_array().unwrap().contains(&json!(QUICK)));
}

#[tokio::test]
async fn job_lifecycle_over_http() {
    let ctx = TestHarness::new(Duration::from_secs(3600)).unwrap();
    let app = build_app(ctx.supervisor.clone());

    let (status, started) = send(
        &app,
        "POST",
        "/jobs/sleeper",
        Some(json!({ "env": { "GREETING": "hi" } })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = started["id"].as_str().unwrap().to_string();
    assert!(started["note"].as_str().unwrap().contains("same unit"));

    let (status, job) = send(&app, "GET", &format!("/jobs/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["state"], "RUNNING");

    let (status, _) = send(&app, "DELETE", &format!("/jobs/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, listed) = send(&app, "GET", "/jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["active_runs"], 1);

    ctx.wait_for_log(&id, "started").await.unwrap();

    let (status, cancelled) = send(&app, "POST", &format!("/jobs/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["cancelled"], true);

    let job = ctx.wait_for_terminal(&id).await.unwrap();
    assert_eq!(job.state, harvest_server::kernel::jobs::JobState::Killed);

    let (status, logs) = send(&app, "GET", &format!("/jobs/{id}/logs?offset=0"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(logs["data"].as_str().unwrap().contains("started"));
    assert_eq!(logs["eof"], true);

    let (status, _) = send(&app, "DELETE", &format!("/jobs/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn start_without_body_and_error_statuses() {
    let ctx = TestHarness::new(Duration::from_secs(3600)).unwrap();
    let app = build_app(ctx.supervisor.clone());

    let (status, started) = send(&app, "POST", "/jobs/failing", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(started["id"].as_str().unwrap().starts_with("failing_"));

    let (status, body) = send(&app, "POST", "/jobs/unknown-unit", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("unknown-unit"));

    let (status, body) = send(&app, "POST", "/jobs/phantom", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["id"].as_str().unwrap().starts_with("phantom_"));

    let (status, _) = send(&app, "GET", "/jobs/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", "/jobs/nope/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_start_body_is_rejected() {
    let ctx = TestHarness::new(Duration::from_secs(3600)).unwrap();
    let app = build_app(ctx.supervisor.clone());

    let (status, body) = send(&app, "POST", "/jobs/quick", Some(json!({ "env": { "A": 1 } }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid start request"));
    assert!(ctx.supervisor.list().is_empty());

    let request = Request::builder()
        .method("POST")
        .uri("/jobs/quick")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(ctx.supervisor.list().is_empty());
}
