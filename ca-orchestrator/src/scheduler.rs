//! Asynchronous task scheduling
//!
//! The dispatcher hands persisted task ids to a [`TaskScheduler`]; the tokio
//! implementation runs each execution round in its own spawned task so that a
//! failing or panicking round cannot affect the caller or other rounds.

use async_trait::async_trait;
use ca_common::model::TaskId;
use ca_common::{Error, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::tasks;
use crate::services::executor::TaskExecutor;

#[async_trait]
pub trait TaskScheduler: Send + Sync {
    /// Queue an execution round for `task_id` after `delay`
    ///
    /// Returns once the round is queued, never after it ran.
    async fn schedule(&self, task_id: TaskId, delay: Duration) -> Result<()>;
}

/// Runs execution rounds on the tokio runtime
pub struct TokioTaskScheduler {
    executor: Arc<TaskExecutor>,
    shutdown: CancellationToken,
}

impl TokioTaskScheduler {
    pub fn new(executor: Arc<TaskExecutor>, shutdown: CancellationToken) -> Self {
        Self { executor, shutdown }
    }
}

#[async_trait]
impl TaskScheduler for TokioTaskScheduler {
    async fn schedule(&self, task_id: TaskId, delay: Duration) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Internal("scheduler is shutting down".to_string()));
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Internal(format!("no runtime for scheduling: {}", e)))?;

        let executor = Arc::clone(&self.executor);
        let shutdown = self.shutdown.clone();
        handle.spawn(async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!(task_id, "Scheduled round dropped at shutdown");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            executor.execute(task_id).await;
        });

        tracing::debug!(task_id, delay_ms = delay.as_millis() as u64, "Task round scheduled");
        Ok(())
    }
}

/// Re-queue tasks created before `created_before` that still have undelivered backends
///
/// Returns how many tasks were queued.
pub async fn sweep_pending(
    db: &SqlitePool,
    scheduler: &dyn TaskScheduler,
    created_before: chrono::DateTime<Utc>,
) -> Result<usize> {
    let pending = tasks::tasks_pending_delivery(db, created_before).await?;
    let mut queued = 0;
    for task_id in pending {
        match scheduler.schedule(task_id, Duration::ZERO).await {
            Ok(()) => queued += 1,
            Err(e) => tracing::warn!(task_id, error = %e, "Retry sweep could not queue task"),
        }
    }
    Ok(queued)
}

/// Periodically re-queue tasks with NOT_STARTED backends until `shutdown` fires
///
/// Only tasks older than one interval are picked up so that freshly created
/// tasks are left to their own scheduled round.
pub fn spawn_retry_sweep(
    db: SqlitePool,
    scheduler: Arc<dyn TaskScheduler>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Retry sweep stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let cutoff = match chrono::Duration::from_std(interval) {
                        Ok(age) => Utc::now() - age,
                        Err(_) => Utc::now(),
                    };
                    match sweep_pending(&db, scheduler.as_ref(), cutoff).await {
                        Ok(0) => {}
                        Ok(queued) => tracing::info!(queued, "Retry sweep re-queued tasks"),
                        Err(e) => tracing::error!(error = %e, "Retry sweep failed"),
                    }
                }
            }
        }
    })
}
