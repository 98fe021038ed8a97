//! Task delivery to backends
//!
//! One execution round delivers a task to every assigned backend that is
//! still NOT_STARTED and holds the capabilities the task type needs.
//! Deliveries run in parallel and fail independently; statuses of the round
//! are written together once every delivery has finished.

use ca_common::model::{
    Backend, BackendId, BackendStatus, BackendStatusList, Capability, TaskId, TaskStatus,
};
use ca_common::{Error, Result};
use futures::future::join_all;
use sqlx::SqlitePool;

use crate::db::tasks;
use crate::services::backend_client::BackendClient;
use crate::services::registry::BackendRegistry;
use crate::services::task_view::{load_task_content, TaskContent};
use crate::utils::retry_on_lock;

/// What happened to each backend in one round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub delivered: Vec<BackendId>,
    pub failed: Vec<BackendId>,
    /// Left NOT_STARTED because the task is anonymous and the backend does not accept that
    pub skipped: Vec<BackendId>,
}

enum Delivery {
    Delivered(BackendId),
    Failed(BackendId),
    Skipped(BackendId),
}

pub struct TaskExecutor {
    db: SqlitePool,
    registry: BackendRegistry,
    client: BackendClient,
    callback_uri: String,
    max_lock_wait_ms: u64,
}

impl TaskExecutor {
    pub fn new(
        db: SqlitePool,
        registry: BackendRegistry,
        client: BackendClient,
        callback_uri: String,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            registry,
            client,
            callback_uri,
            max_lock_wait_ms,
        }
    }

    /// Run one round, logging instead of returning errors
    pub async fn execute(&self, task_id: TaskId) {
        match self.try_execute(task_id).await {
            Ok(report) => {
                tracing::debug!(
                    task_id,
                    delivered = ?report.delivered,
                    failed = ?report.failed,
                    skipped = ?report.skipped,
                    "Execution round finished"
                );
            }
            Err(e) => {
                tracing::error!(task_id, error = %e, "Execution round failed");
            }
        }
    }

    pub async fn try_execute(&self, task_id: TaskId) -> Result<RoundReport> {
        let pending = tasks::get_backend_statuses(&self.db, task_id, Some(TaskStatus::NotStarted))
            .await?;
        if pending.is_empty() {
            tracing::debug!(task_id, "No undelivered backends");
            return Ok(RoundReport::default());
        }

        let content = load_task_content(&self.db, task_id).await?;
        let task_type = content.header.task_type;
        let Some(required) = task_type.required_capabilities() else {
            tracing::warn!(task_id, task_type = %task_type, "Task type is not executable");
            return Ok(RoundReport::default());
        };

        let mut targets = Vec::new();
        for backend_id in pending.backend_ids() {
            match self.registry.get(backend_id).await? {
                Some(backend) if backend.has_all_capabilities(required) => targets.push(backend),
                Some(_) => {
                    tracing::debug!(task_id, backend_id, "Backend lacks required capabilities")
                }
                None => tracing::debug!(task_id, backend_id, "Backend unknown or disabled"),
            }
        }
        if targets.is_empty() {
            tracing::info!(task_id, task_type = %task_type, "No capable backend for round");
            return Ok(RoundReport::default());
        }

        let deliveries = join_all(targets.iter().map(|backend| self.deliver(&content, backend))).await;

        let mut report = RoundReport::default();
        let mut round = BackendStatusList::new();
        for delivery in deliveries {
            match delivery {
                Delivery::Delivered(backend_id) => {
                    round.set(BackendStatus::new(backend_id, TaskStatus::Executing));
                    report.delivered.push(backend_id);
                }
                Delivery::Failed(backend_id) => report.failed.push(backend_id),
                Delivery::Skipped(backend_id) => report.skipped.push(backend_id),
            }
        }

        if !round.is_empty() {
            retry_on_lock("status round", self.max_lock_wait_ms, || {
                tasks::update_backend_statuses(&self.db, task_id, &round)
            })
            .await?;
        }

        tracing::info!(
            task_id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Task delivered"
        );
        Ok(report)
    }

    async fn deliver(&self, content: &TaskContent, backend: &Backend) -> Delivery {
        let task_id = content.header.task_id;
        let backend_id = backend.backend_id;

        if content.header.owner.is_none() && !backend.has_capability(Capability::AnonymousTask) {
            tracing::debug!(task_id, backend_id, "Backend does not accept anonymous tasks");
            return Delivery::Skipped(backend_id);
        }

        let view = content.view_for(backend, &self.callback_uri);
        match self.client.add_task(backend, &view).await {
            Ok(response) => {
                tracing::debug!(
                    task_id,
                    backend_id,
                    status = response.status,
                    body = %response.body,
                    "Backend answered addTask"
                );
                Delivery::Delivered(backend_id)
            }
            Err(e) => {
                let failure = Error::DeliveryFailure {
                    backend_id,
                    reason: e.to_string(),
                };
                tracing::warn!(task_id, backend_id, error = %failure, "Delivery failed");
                Delivery::Failed(backend_id)
            }
        }
    }
}
