//! HTTP API integration tests for ca-orchestrator
//!
//! Exercise the router end to end over a temporary database with local
//! fake backends.

mod common;

use axum::http::StatusCode;
use ca_common::model::{Capability, TaskStatus};
use ca_orchestrator::build_router;
use serde_json::json;
use std::time::{Duration, Instant};
use tower::util::ServiceExt;

use common::{
    backend, empty_request, eventually, extract_json, json_request, setup_state,
    spawn_fake_backend, FakeBackend,
};

// ============================================================================
// Health and Registry Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let endpoint = "http://127.0.0.1:9";
    let (_dir, state) = setup_state(&[backend(1, endpoint, &[Capability::PhotoAnalysis])]).await;
    let app = build_router(state);

    let response = app.oneshot(empty_request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "ca-orchestrator");
    assert_eq!(body["backends_enabled"], 1);
    assert!(body["uptime_seconds"].is_number());
}

#[tokio::test]
async fn test_list_backends() {
    let (_dir, state) = setup_state(&[
        backend(1, "http://127.0.0.1:9", &[Capability::PhotoAnalysis]),
        backend(2, "http://127.0.0.1:9", &[Capability::PhotoSearch]),
    ])
    .await;
    let app = build_router(state);

    let response = app.oneshot(empty_request("GET", "/backends")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    let backends = body["backends"].as_array().unwrap();
    assert_eq!(backends.len(), 2);
    assert_eq!(backends[1]["capabilities"], json!(["PHOTO_SEARCH"]));
}

// ============================================================================
// Task Submission Tests
// ============================================================================

#[tokio::test]
async fn test_submit_without_backends_is_unavailable() {
    let (_dir, state) = setup_state(&[]).await;
    let app = build_router(state);

    let request = json_request(
        "POST",
        "/tasks/analysis",
        json!({ "user_id": 1, "items": [{ "service_type": "PICASA" }] }),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = extract_json(response.into_body()).await;
    assert!(body["error"]["code"].is_string());
}

#[tokio::test]
async fn test_submit_empty_items_is_rejected() {
    let (_dir, state) =
        setup_state(&[backend(1, "http://127.0.0.1:9", &[Capability::PhotoAnalysis])]).await;
    let app = build_router(state);

    let request = json_request("POST", "/tasks/analysis", json!({ "user_id": 1, "items": [] }));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_returns_before_slow_delivery() {
    let fake = FakeBackend::default().delayed(Duration::from_secs(3));
    let endpoint = spawn_fake_backend(fake.clone()).await;
    let (_dir, state) = setup_state(&[backend(1, &endpoint, &[Capability::PhotoAnalysis])]).await;
    let app = build_router(state);

    let started = Instant::now();
    let request = json_request(
        "POST",
        "/tasks/analysis",
        json!({ "user_id": 1, "items": [{ "service_type": "PICASA", "url": "http://img/1" }] }),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(started.elapsed() < Duration::from_secs(2));

    let body = extract_json(response.into_body()).await;
    let task_id = body["task_id"].as_i64().unwrap();
    assert_eq!(body["guids"].as_array().unwrap().len(), 1);
    assert_eq!(fake.received_count(), 0);

    let response = app
        .oneshot(empty_request("GET", &format!("/tasks/{}", task_id)))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "NOT_STARTED");
}

#[tokio::test]
async fn test_get_unknown_task() {
    let (_dir, state) = setup_state(&[]).await;
    let app = build_router(state);

    let response = app.oneshot(empty_request("GET", "/tasks/42")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = extract_json(response.into_body()).await;
    assert!(body["error"]["message"].as_str().unwrap().contains("42"));
}

// ============================================================================
// Backend Callback Tests
// ============================================================================

#[tokio::test]
async fn test_task_finished_from_unassigned_backend() {
    let (_dir, state) =
        setup_state(&[backend(1, "http://127.0.0.1:9", &[Capability::PhotoAnalysis])]).await;
    let app = build_router(state.clone());

    let request = json_request(
        "POST",
        "/taskFinished",
        json!({
            "task_id": 5,
            "backend_id": 99,
            "task_type": "ANALYSIS",
            "status": "COMPLETED",
            "result_items": [{ "guid": "g1" }]
        }),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let items = ca_orchestrator::db::media::get_items(&state.db, &["g1".to_string()])
        .await
        .unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_task_finished_missing_fields() {
    let (_dir, state) = setup_state(&[]).await;
    let app = build_router(state);

    let request = json_request("POST", "/taskFinished", json!({ "status": "COMPLETED" }));
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_query_details_for_unassigned_backend() {
    let (_dir, state) =
        setup_state(&[backend(1, "http://127.0.0.1:9", &[Capability::PhotoAnalysis])]).await;
    let app = build_router(state);

    let response = app
        .oneshot(empty_request("GET", "/queryTaskDetails?task_id=1&backend_id=3"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_analysis_round_trip() {
    let fake = FakeBackend::default();
    let endpoint = spawn_fake_backend(fake.clone()).await;
    let (_dir, state) = setup_state(&[backend(1, &endpoint, &[Capability::PhotoAnalysis])]).await;
    let app = build_router(state.clone());

    let request = json_request(
        "POST",
        "/tasks/analysis",
        json!({ "user_id": 7, "items": [{ "guid": "photo-1", "service_type": "FSIO" }] }),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let task_id = extract_json(response.into_body()).await["task_id"]
        .as_i64()
        .unwrap();

    let delivered = eventually(|| {
        let db = state.db.clone();
        async move {
            ca_orchestrator::db::tasks::get_backend_status(&db, task_id, 1)
                .await
                .ok()
                .flatten()
                .is_some_and(|s| s.status == TaskStatus::Executing)
        }
    })
    .await;
    assert!(delivered);

    let sent = fake.received.lock().unwrap()[0].clone();
    assert_eq!(sent["task_id"], task_id);
    assert!(sent["callback_uri"].as_str().unwrap().ends_with("/taskFinished"));

    let request = json_request(
        "POST",
        "/taskFinished",
        json!({
            "task_id": task_id,
            "backend_id": 1,
            "task_type": "ANALYSIS",
            "status": "COMPLETED",
            "result_items": [{
                "guid": "photo-1",
                "media_objects": [{
                    "object_id": "kw-1",
                    "media_type": "keyword",
                    "confirmation_status": "CANDIDATE",
                    "value": "tree"
                }]
            }]
        }),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = extract_json(response.into_body()).await;
    assert_eq!(outcome["inserted"], 1);

    let response = app
        .oneshot(empty_request("GET", &format!("/tasks/{}", task_id)))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "COMPLETED");
}
