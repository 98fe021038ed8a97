//! Completion callbacks from backends
//!
//! A backend reports the outcome of a task it received through `addTask`.
//! The report is checked against the task's backend assignment, its media
//! objects are reconciled with stored identity and written in one batch, the
//! per-item history and the backend's status are persisted, and analysis
//! results are shared with other feedback-capable backends.
//!
//! Reports for the same (task, backend) pair are applied one at a time.

use ca_common::events::{CaEvent, EventBus};
use ca_common::model::{
    BackendFeedbackTaskBuilder, BackendId, BackendStatus, BackendStatusList, Guid, MediaItem,
    MediaObject, TaskId, TaskStatus, TaskType,
};
use ca_common::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::db::{media, tasks};
use crate::services::dispatcher::TaskDispatcher;
use crate::services::identity::{IdentityResolver, Resolved};
use crate::services::registry::BackendRegistry;
use crate::utils::retry_on_lock;

/// `taskFinished` body
///
/// Every field is optional on the wire; presence is checked on ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResultReport {
    #[serde(default)]
    pub backend_id: Option<BackendId>,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result_items: Vec<MediaItem>,
}

/// Summary of an accepted report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub task_id: TaskId,
    pub backend_id: BackendId,
    pub status: TaskStatus,
    pub inserted: usize,
    pub updated: usize,
    /// Updates skipped because the stored object is newer
    pub stale: usize,
    /// Items dropped because their owner could not be resolved
    pub dropped_items: usize,
    /// Updates dropped because the backend may not change the object
    pub rejected_updates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_task_id: Option<TaskId>,
}

#[derive(Debug, Default)]
struct Absorbed {
    items: Vec<MediaItem>,
    inserted: usize,
    updated: usize,
    stale: usize,
    dropped_items: usize,
    rejected_updates: usize,
}

pub struct CompletionIngestor {
    db: SqlitePool,
    resolver: IdentityResolver,
    registry: BackendRegistry,
    dispatcher: Arc<TaskDispatcher>,
    event_bus: EventBus,
    max_lock_wait_ms: u64,
    locks: Mutex<HashMap<(TaskId, BackendId), Arc<Mutex<()>>>>,
}

impl CompletionIngestor {
    pub fn new(
        db: SqlitePool,
        registry: BackendRegistry,
        dispatcher: Arc<TaskDispatcher>,
        event_bus: EventBus,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            resolver: IdentityResolver::new(db.clone()),
            db,
            registry,
            dispatcher,
            event_bus,
            max_lock_wait_ms,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Apply a backend's completion report
    ///
    /// A report for a backend not assigned to the task is rejected with
    /// `UnexpectedBackend` and changes nothing. Once the assignment is
    /// confirmed, the backend's status is always persisted and a
    /// `TaskStatusChanged` event is always published, also when the report's
    /// content is rejected (the status then becomes ERROR).
    pub async fn ingest(&self, report: TaskResultReport) -> Result<IngestOutcome> {
        let task_id = report
            .task_id
            .ok_or_else(|| Error::InvalidInput("task_id is required".to_string()))?;
        let backend_id = report
            .backend_id
            .ok_or_else(|| Error::InvalidInput("backend_id is required".to_string()))?;
        let reported_type = report
            .task_type
            .ok_or_else(|| Error::InvalidInput("task_type is required".to_string()))?;

        let key = (task_id, backend_id);
        let slot = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key).or_default())
        };
        let result = {
            let _guard = slot.lock().await;
            self.ingest_locked(task_id, backend_id, reported_type, report)
                .await
        };
        drop(slot);

        {
            let mut locks = self.locks.lock().await;
            if locks.get(&key).map_or(false, |l| Arc::strong_count(l) == 1) {
                locks.remove(&key);
            }
        }

        result
    }

    async fn ingest_locked(
        &self,
        task_id: TaskId,
        backend_id: BackendId,
        reported_type: TaskType,
        report: TaskResultReport,
    ) -> Result<IngestOutcome> {
        if tasks::get_backend_status(&self.db, task_id, backend_id)
            .await?
            .is_none()
        {
            tracing::warn!(task_id, backend_id, "Completion report from unassigned backend");
            return Err(Error::UnexpectedBackend {
                task_id,
                backend_id,
            });
        }
        let header = tasks::get_task_header(&self.db, task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;
        if header.task_type != reported_type {
            tracing::warn!(
                task_id,
                backend_id,
                reported = %reported_type,
                stored = %header.task_type,
                "Reported task type differs from stored task type"
            );
        }
        let task_type = header.task_type;

        let mut final_status = BackendStatus {
            backend_id,
            status: report.status.unwrap_or(TaskStatus::Unknown),
            message: report.message,
        };

        let absorbed = self
            .absorb(task_id, backend_id, final_status.status, report.result_items)
            .await;
        if let Err(e) = &absorbed {
            tracing::warn!(task_id, backend_id, error = %e, "Rejected completion report content");
            final_status.status = TaskStatus::Error;
            final_status.message = Some(e.to_string());
        }

        let persisted = self.persist_status(task_id, &final_status).await;

        let mut feedback_task_id = None;
        if let (Ok(absorbed), Ok(())) = (&absorbed, &persisted) {
            if task_type == TaskType::Analysis && !absorbed.items.is_empty() {
                match self
                    .chain_backend_feedback(task_id, backend_id, &absorbed.items)
                    .await
                {
                    Ok(id) => feedback_task_id = id,
                    Err(e) => {
                        tracing::error!(task_id, backend_id, error = %e, "Backend feedback chaining failed")
                    }
                }
            }
        }

        self.event_bus.emit_lossy(CaEvent::TaskStatusChanged {
            backend_id,
            task_id,
            task_type,
            status: final_status.status,
            timestamp: Utc::now(),
        });

        persisted?;
        let absorbed = absorbed?;

        tracing::info!(
            task_id,
            backend_id,
            status = %final_status.status,
            inserted = absorbed.inserted,
            updated = absorbed.updated,
            "Completion report ingested"
        );

        Ok(IngestOutcome {
            task_id,
            backend_id,
            status: final_status.status,
            inserted: absorbed.inserted,
            updated: absorbed.updated,
            stale: absorbed.stale,
            dropped_items: absorbed.dropped_items,
            rejected_updates: absorbed.rejected_updates,
            feedback_task_id,
        })
    }

    async fn persist_status(&self, task_id: TaskId, status: &BackendStatus) -> Result<()> {
        let list: BackendStatusList = std::iter::once(status.clone()).collect();
        retry_on_lock("backend status", self.max_lock_wait_ms, || {
            tasks::update_backend_statuses(&self.db, task_id, &list)
        })
        .await
    }

    async fn absorb(
        &self,
        task_id: TaskId,
        backend_id: BackendId,
        reported: TaskStatus,
        items: Vec<MediaItem>,
    ) -> Result<Absorbed> {
        let mut absorbed = Absorbed::default();
        if items.is_empty() {
            return Ok(absorbed);
        }

        let guids: Vec<Guid> = items.iter().map(|i| i.guid.clone()).collect();
        let owners: HashMap<Guid, Option<i64>> = media::get_items(&self.db, &guids)
            .await?
            .into_iter()
            .map(|i| (i.guid, i.owner))
            .collect();

        let mut surviving = Vec::with_capacity(items.len());
        for item in items {
            match owners.get(&item.guid).copied().flatten() {
                Some(owner) => surviving.push((owner, item)),
                None => {
                    tracing::warn!(task_id, backend_id, guid = %item.guid, "Dropping result item without known owner");
                    absorbed.dropped_items += 1;
                }
            }
        }

        for (_, item) in &surviving {
            if !item.backend_status.is_empty()
                && (item.backend_status.len() != 1 || !item.backend_status.contains(backend_id))
            {
                return Err(Error::InvalidPayload(format!(
                    "item {} carries status for backends other than {}",
                    item.guid, backend_id
                )));
            }
        }

        let mut origins: Vec<Guid> = Vec::new();
        let mut objects: Vec<MediaObject> = Vec::new();
        for (owner, item) in surviving.iter_mut() {
            for mut object in std::mem::take(&mut item.media_objects) {
                if object.backend_id.is_some_and(|id| id != backend_id) {
                    let conflict = Error::IdentityConflict(format!(
                        "object {:?} claims backend {:?}",
                        object.object_id, object.backend_id
                    ));
                    tracing::warn!(task_id, backend_id, error = %conflict, "Identity conflict");
                }
                object.backend_id = Some(backend_id);
                object.owner = Some(*owner);
                origins.push(item.guid.clone());
                objects.push(object);
            }
        }

        let resolution = self.resolver.resolve(&mut objects).await?;

        let mut inserts: Vec<(Guid, MediaObject)> = Vec::new();
        let mut updates: Vec<MediaObject> = Vec::new();
        for (index, (guid, object)) in origins.into_iter().zip(objects).enumerate() {
            match resolution.get(index) {
                Some(Resolved::Existing(stored)) => {
                    if stored.mutable_by_backend(backend_id) {
                        updates.push(object);
                    } else {
                        let conflict = Error::IdentityConflict(format!(
                            "backend {} may not change media object {}",
                            backend_id, stored.media_object_id
                        ));
                        tracing::warn!(task_id, backend_id, error = %conflict, "Identity conflict");
                        absorbed.rejected_updates += 1;
                    }
                }
                _ => inserts.push((guid, object)),
            }
        }

        for (guid, object) in &inserts {
            object
                .validate()
                .map_err(|reason| Error::InvalidPayload(format!("item {}: {}", guid, reason)))?;
        }
        for object in &updates {
            object.validate().map_err(|reason| {
                Error::InvalidPayload(format!("media object {:?}: {}", object.media_object_id, reason))
            })?;
        }

        let summary = media::apply_object_changes(&self.db, &mut inserts, &mut updates).await?;
        absorbed.inserted = summary.inserted;
        absorbed.updated = summary.updated;
        absorbed.stale = summary.stale;

        let history: Vec<(Guid, BackendStatus)> = surviving
            .iter()
            .map(|(_, item)| {
                let status = item
                    .backend_status
                    .get(backend_id)
                    .cloned()
                    .unwrap_or_else(|| BackendStatus::new(backend_id, reported));
                (item.guid.clone(), status)
            })
            .collect();
        retry_on_lock("media status", self.max_lock_wait_ms, || {
            tasks::upsert_media_statuses(&self.db, task_id, &history)
        })
        .await?;

        absorbed.items = surviving.into_iter().map(|(_, item)| item).collect();
        Ok(absorbed)
    }

    /// Share analysis results with feedback-capable backends outside this task
    async fn chain_backend_feedback(
        &self,
        task_id: TaskId,
        reporter: BackendId,
        items: &[MediaItem],
    ) -> Result<Option<TaskId>> {
        let assigned = tasks::get_backend_statuses(&self.db, task_id, None).await?;
        let required = TaskType::BackendFeedback
            .required_capabilities()
            .unwrap_or_default();
        let targets: Vec<BackendId> = self
            .registry
            .backends_with_all_capabilities(required)
            .await?
            .into_iter()
            .map(|b| b.backend_id)
            .filter(|id| *id != reporter && !assigned.contains(*id))
            .collect();
        if targets.is_empty() {
            return Ok(None);
        }

        let Some(task) = BackendFeedbackTaskBuilder::new()
            .add_media_list(items.iter().map(|i| MediaItem::new(i.guid.clone())))
            .backends(BackendStatusList::with_status(targets, TaskStatus::NotStarted))
            .related_task(task_id)
            .build()
        else {
            return Ok(None);
        };

        let feedback_id = self.dispatcher.create_and_schedule(task).await?;
        tracing::info!(task_id, feedback_task_id = feedback_id, "Backend feedback task created");
        Ok(Some(feedback_id))
    }
}
