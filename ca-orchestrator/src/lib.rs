//! Content-analysis orchestrator library interface
//!
//! Exposes the service state and router for the binary and for integration tests.

pub mod api;
pub mod db;
pub mod error;
pub mod scheduler;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use ca_common::config::TomlConfig;
use ca_common::events::EventBus;
use ca_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::scheduler::{TaskScheduler, TokioTaskScheduler};
use crate::services::{
    BackendClient, BackendRegistry, CompletionIngestor, MediaService, SearchFanout,
    TaskDispatcher, TaskExecutor,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    pub config: Arc<TomlConfig>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub registry: BackendRegistry,
    pub scheduler: Arc<dyn TaskScheduler>,
    pub dispatcher: Arc<TaskDispatcher>,
    pub ingestor: Arc<CompletionIngestor>,
    pub search: Arc<SearchFanout>,
    pub media: Arc<MediaService>,
    /// Cancelled at shutdown; stops pending rounds and the retry sweep
    pub shutdown: CancellationToken,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// Wire every service with the tokio scheduler
    pub fn new(db: SqlitePool, config: TomlConfig, shutdown: CancellationToken) -> Result<Self> {
        let client = backend_client(config.delivery_timeout_secs)?;
        let executor = Arc::new(TaskExecutor::new(
            db.clone(),
            BackendRegistry::new(db.clone()),
            client,
            format!("{}/taskFinished", config.callback_base_url()),
            config.database_max_lock_wait_ms,
        ));
        let scheduler: Arc<dyn TaskScheduler> =
            Arc::new(TokioTaskScheduler::new(executor, shutdown.clone()));
        Self::with_scheduler(db, config, scheduler, shutdown)
    }

    /// Wire every service around an existing scheduler
    pub fn with_scheduler(
        db: SqlitePool,
        config: TomlConfig,
        scheduler: Arc<dyn TaskScheduler>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let event_bus = EventBus::new(config.event_capacity);
        let registry = BackendRegistry::new(db.clone());
        let dispatcher = Arc::new(TaskDispatcher::new(
            db.clone(),
            registry.clone(),
            Arc::clone(&scheduler),
            event_bus.clone(),
            config.task_delay_ms,
            config.database_max_lock_wait_ms,
        ));
        let ingestor = Arc::new(CompletionIngestor::new(
            db.clone(),
            registry.clone(),
            Arc::clone(&dispatcher),
            event_bus.clone(),
            config.database_max_lock_wait_ms,
        ));
        let search = Arc::new(SearchFanout::new(
            db.clone(),
            registry.clone(),
            backend_client(config.search_timeout_secs)?,
            Duration::from_secs(config.search_timeout_secs),
        ));
        let media = Arc::new(MediaService::new(db.clone(), Arc::clone(&dispatcher)));

        Ok(Self {
            db,
            config: Arc::new(config),
            event_bus,
            registry,
            scheduler,
            dispatcher,
            ingestor,
            search,
            media,
            shutdown,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        })
    }

    /// Remember a server-side failure for the health endpoint
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

fn backend_client(timeout_secs: u64) -> Result<BackendClient> {
    BackendClient::new(Duration::from_secs(timeout_secs))
        .map_err(|e| Error::Internal(format!("HTTP client: {}", e)))
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::task_routes())
        .merge(api::media_routes())
        .merge(api::search_routes())
        .merge(api::backend_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
