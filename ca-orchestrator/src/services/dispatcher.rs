//! Task creation and scheduling
//!
//! Persists a task with every assigned backend NOT_STARTED and queues its
//! first execution round. Never waits for delivery.

use ca_common::events::{CaEvent, EventBus};
use ca_common::model::{BackendStatusList, TaskDetails, TaskId, TaskStatus, DEFAULT_CAPABILITIES};
use ca_common::{Error, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::db::tasks;
use crate::scheduler::TaskScheduler;
use crate::services::registry::BackendRegistry;
use crate::utils::retry_on_lock;

pub struct TaskDispatcher {
    db: SqlitePool,
    registry: BackendRegistry,
    scheduler: Arc<dyn TaskScheduler>,
    event_bus: EventBus,
    delay: Duration,
    max_lock_wait_ms: u64,
}

impl TaskDispatcher {
    /// `delay_ms <= 0` runs rounds immediately
    pub fn new(
        db: SqlitePool,
        registry: BackendRegistry,
        scheduler: Arc<dyn TaskScheduler>,
        event_bus: EventBus,
        delay_ms: i64,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            registry,
            scheduler,
            event_bus,
            delay: Duration::from_millis(delay_ms.max(0) as u64),
            max_lock_wait_ms,
        }
    }

    /// Persist `task` (unless it already has an id) and queue its execution
    ///
    /// A task without backends is assigned every enabled backend holding any
    /// of the default capabilities. A failure to queue is logged; the task stays
    /// persisted and is picked up by the retry sweep.
    pub async fn create_and_schedule(&self, mut task: TaskDetails) -> Result<TaskId> {
        let task_id = match task.task_id {
            Some(task_id) => task_id,
            None => {
                task.validate()?;

                if task.backends.is_empty() {
                    let backends = self
                        .registry
                        .backends_with_any_capability(&DEFAULT_CAPABILITIES)
                        .await?;
                    if backends.is_empty() {
                        return Err(Error::NoCapableBackend(format!(
                            "no enabled backend for {} task",
                            task.task_type
                        )));
                    }
                    task.backends = BackendStatusList::with_status(
                        backends.iter().map(|b| b.backend_id),
                        TaskStatus::NotStarted,
                    );
                } else {
                    task.backends.set_all(TaskStatus::NotStarted);
                }

                let task_id = retry_on_lock("task insert", self.max_lock_wait_ms, || {
                    tasks::insert_task(&self.db, &task)
                })
                .await?;
                task.task_id = Some(task_id);
                task_id
            }
        };

        match self.scheduler.schedule(task_id, self.delay).await {
            Ok(()) => {
                tracing::info!(
                    task_id,
                    task_type = %task.task_type,
                    backends = task.backends.len(),
                    "Task scheduled"
                );
                self.event_bus.emit_lossy(CaEvent::TaskScheduled {
                    task_id,
                    task_type: task.task_type,
                    backend_count: task.backends.len(),
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                tracing::error!(task_id, error = %e, "Failed to queue task, left for retry sweep");
            }
        }

        Ok(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::tests::RecordingScheduler;
    use ca_common::model::{Backend, Capability, DataGroups, MediaItem};
    use tempfile::TempDir;

    async fn setup(
        capabilities: &[&[Capability]],
    ) -> (TempDir, SqlitePool, Arc<RecordingScheduler>, TaskDispatcher) {
        let temp_dir = TempDir::new().unwrap();
        let pool = ca_common::db::init_database(&temp_dir.path().join("ca.db"))
            .await
            .unwrap();
        let registry = BackendRegistry::new(pool.clone());
        for (index, caps) in capabilities.iter().enumerate() {
            let backend_id = index as i64 + 1;
            registry
                .upsert(&Backend {
                    backend_id,
                    endpoint: format!("http://localhost:{}", 9000 + backend_id),
                    enabled: true,
                    capabilities: caps.iter().copied().collect(),
                    default_data_groups: DataGroups::basic(),
                    description: None,
                })
                .await
                .unwrap();
        }

        let scheduler = Arc::new(RecordingScheduler::default());
        let dispatcher = TaskDispatcher::new(
            pool.clone(),
            registry,
            scheduler.clone(),
            EventBus::new(16),
            -5,
            1000,
        );
        (temp_dir, pool, scheduler, dispatcher)
    }

    #[tokio::test]
    async fn test_assigns_default_backends_not_started() {
        let (_dir, pool, scheduler, dispatcher) = setup(&[&DEFAULT_CAPABILITIES]).await;

        let task = TaskDetails::analysis(Some(1), vec![MediaItem::new("g1")], None).unwrap();
        let task_id = dispatcher.create_and_schedule(task).await.unwrap();

        let statuses = tasks::get_backend_statuses(&pool, task_id, None).await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses.get(1).unwrap().status, TaskStatus::NotStarted);

        let scheduled = scheduler.scheduled.lock().unwrap().clone();
        assert_eq!(scheduled, vec![(task_id, Duration::ZERO)]);
    }

    #[tokio::test]
    async fn test_backend_with_one_default_capability_is_assigned() {
        let (_dir, pool, scheduler, dispatcher) = setup(&[
            &[Capability::PhotoAnalysis],
            &[Capability::PhotoSearch],
            &[Capability::UserFeedback],
        ])
        .await;

        let task = TaskDetails::analysis(Some(1), vec![MediaItem::new("g1")], None).unwrap();
        let task_id = dispatcher.create_and_schedule(task).await.unwrap();

        let statuses = tasks::get_backend_statuses(&pool, task_id, None).await.unwrap();
        assert_eq!(statuses.backend_ids(), vec![1, 3]);
        assert_eq!(scheduler.scheduled.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_capable_backend() {
        let (_dir, _pool, scheduler, dispatcher) = setup(&[]).await;

        let task = TaskDetails::analysis(Some(1), vec![MediaItem::new("g1")], None).unwrap();
        let result = dispatcher.create_and_schedule(task).await;

        assert!(matches!(result, Err(Error::NoCapableBackend(_))));
        assert!(scheduler.scheduled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_existing_task_is_only_rescheduled() {
        let (_dir, pool, scheduler, dispatcher) = setup(&[&DEFAULT_CAPABILITIES]).await;

        let mut task = TaskDetails::analysis(Some(1), vec![MediaItem::new("g1")], None).unwrap();
        task.task_id = Some(77);
        let task_id = dispatcher.create_and_schedule(task).await.unwrap();

        assert_eq!(task_id, 77);
        assert!(tasks::get_task_header(&pool, 77).await.unwrap().is_none());
        assert_eq!(scheduler.scheduled.lock().unwrap().len(), 1);
    }
}
