//! Shared helpers for orchestrator integration tests

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    routing::post,
    Json, Router,
};
use ca_common::config::TomlConfig;
use ca_common::model::{Backend, BackendId, Capability, DataGroups};
use ca_orchestrator::AppState;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Local stand-in for an analysis backend
#[derive(Clone, Default)]
pub struct FakeBackend {
    /// Bodies received on `addTask`
    pub received: Arc<Mutex<Vec<Value>>>,
    /// GUIDs returned by the similarity methods
    pub search_results: Vec<String>,
    /// Delay before every answer
    pub delay: Duration,
}

impl FakeBackend {
    pub fn with_results(results: &[&str]) -> Self {
        Self {
            search_results: results.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn received_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

async fn add_task(State(fake): State<FakeBackend>, Json(body): Json<Value>) -> StatusCode {
    tokio::time::sleep(fake.delay).await;
    fake.received.lock().unwrap().push(body);
    StatusCode::OK
}

async fn similar(State(fake): State<FakeBackend>) -> Json<Value> {
    tokio::time::sleep(fake.delay).await;
    let items: Vec<Value> = fake
        .search_results
        .iter()
        .map(|guid| json!({ "guid": guid }))
        .collect();
    Json(json!({ "items": items }))
}

/// Serve `fake` on an ephemeral port and return its base URI
pub async fn spawn_fake_backend(fake: FakeBackend) -> String {
    let app = Router::new()
        .route("/addTask", post(add_task))
        .route("/similarById", post(similar))
        .route("/similarByContent", post(similar))
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Base URI of a port nothing listens on
pub async fn closed_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

pub fn backend(backend_id: BackendId, endpoint: &str, capabilities: &[Capability]) -> Backend {
    Backend {
        backend_id,
        endpoint: endpoint.to_string(),
        enabled: true,
        capabilities: capabilities.iter().copied().collect(),
        default_data_groups: DataGroups::basic(),
        description: None,
    }
}

/// Service state over a fresh database with `backends` registered
pub async fn setup_state(backends: &[Backend]) -> (TempDir, AppState) {
    let temp_dir = TempDir::new().unwrap();
    let db = ca_common::db::init_database(&temp_dir.path().join("ca.db"))
        .await
        .unwrap();
    let config = TomlConfig {
        delivery_timeout_secs: 5,
        search_timeout_secs: 2,
        retry_sweep_interval_secs: 0,
        ..Default::default()
    };
    let state = AppState::new(db, config, CancellationToken::new()).unwrap();
    for b in backends {
        state.registry.upsert(b).await.unwrap();
    }
    (temp_dir, state)
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

/// Poll until `check` holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..40 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
