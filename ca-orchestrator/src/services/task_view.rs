//! Task views as delivered to a backend
//!
//! Persisted task content is loaded once and tailored per backend: item
//! identity is always present, media objects and per-item statuses only as
//! far as the backend's default data groups select them.

use ca_common::model::{
    Backend, BackendStatusList, Guid, MediaItem, PayloadList, TaskDetails, TaskId, TaskPayload,
};
use ca_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};

use crate::db::tasks::TaskHeader;
use crate::db::{media, tasks};

/// Everything stored about a task, before tailoring
#[derive(Debug, Clone)]
pub struct TaskContent {
    pub header: TaskHeader,
    pub backends: BackendStatusList,
    pub metadata: BTreeMap<String, String>,
    entries: Vec<(PayloadList, Guid)>,
    items: HashMap<Guid, MediaItem>,
    statuses: BTreeMap<Guid, BackendStatusList>,
}

pub async fn load_task_content(db: &SqlitePool, task_id: TaskId) -> Result<TaskContent> {
    let header = tasks::get_task_header(db, task_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;
    let backends = tasks::get_backend_statuses(db, task_id, None).await?;
    let metadata = tasks::get_metadata(db, task_id).await?;
    let entries = tasks::get_payload_entries(db, task_id).await?;

    let mut guids: Vec<Guid> = entries.iter().map(|(_, guid)| guid.clone()).collect();
    guids.sort();
    guids.dedup();

    let mut objects = media::get_item_objects(db, &guids).await?;
    let items = media::get_items(db, &guids)
        .await?
        .into_iter()
        .map(|mut item| {
            item.media_objects = objects.remove(&item.guid).unwrap_or_default();
            (item.guid.clone(), item)
        })
        .collect();
    let statuses = tasks::get_media_statuses(db, task_id, &guids).await?;

    Ok(TaskContent {
        header,
        backends,
        metadata,
        entries,
        items,
        statuses,
    })
}

impl TaskContent {
    fn item_view(&self, guid: &Guid, backend: &Backend) -> MediaItem {
        let groups = &backend.default_data_groups;
        let mut item = self
            .items
            .get(guid)
            .cloned()
            .unwrap_or_else(|| MediaItem::new(guid.clone()));

        item.media_objects.retain(|object| {
            object
                .media_type
                .map_or(false, |media_type| groups.includes_media_type(media_type))
        });
        item.backend_status = if groups.includes_status() {
            self.statuses.get(guid).cloned().unwrap_or_default()
        } else {
            BackendStatusList::new()
        };
        item
    }

    /// Payload rebuilt from the stored list membership, tailored to `backend`
    pub fn payload_for(&self, backend: &Backend) -> TaskPayload {
        let mut media = Vec::new();
        let mut reference = Vec::new();
        let mut similar = Vec::new();
        let mut dissimilar = Vec::new();
        let mut deleted = Vec::new();

        for (list, guid) in &self.entries {
            match list {
                PayloadList::Media => media.push(self.item_view(guid, backend)),
                PayloadList::Reference => reference.push(self.item_view(guid, backend)),
                PayloadList::Similar => similar.push(self.item_view(guid, backend)),
                PayloadList::Dissimilar => dissimilar.push(self.item_view(guid, backend)),
                PayloadList::Deleted => deleted.push(guid.clone()),
            }
        }

        if !deleted.is_empty() {
            TaskPayload::Deleted { guids: deleted }
        } else if !reference.is_empty() || !similar.is_empty() || !dissimilar.is_empty() {
            TaskPayload::Similarity {
                reference,
                similar,
                dissimilar,
            }
        } else {
            TaskPayload::Media { items: media }
        }
    }

    /// The `addTask` body for `backend`
    pub fn view_for(&self, backend: &Backend, callback_uri: &str) -> TaskDetails {
        TaskDetails {
            task_id: Some(self.header.task_id),
            task_type: self.header.task_type,
            owner: self.header.owner,
            backend_id: Some(backend.backend_id),
            callback_uri: Some(callback_uri.to_string()),
            backends: BackendStatusList::new(),
            metadata: self.metadata.clone(),
            parameters: self.header.parameters.clone(),
            payload: self.payload_for(backend),
        }
    }
}

/// Load and tailor in one step
pub async fn load_task_view(
    db: &SqlitePool,
    task_id: TaskId,
    backend: &Backend,
    callback_uri: &str,
) -> Result<TaskDetails> {
    Ok(load_task_content(db, task_id)
        .await?
        .view_for(backend, callback_uri))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ca_common::model::{
        BackendStatus, Capability, DataGroup, DataGroups, MediaObject, MediaType, TaskStatus,
        Visibility,
    };
    use tempfile::TempDir;

    fn backend(groups: &[DataGroup]) -> Backend {
        Backend {
            backend_id: 1,
            endpoint: "http://localhost:9001".to_string(),
            enabled: true,
            capabilities: [Capability::PhotoAnalysis].into(),
            default_data_groups: DataGroups::new(groups.iter().copied()),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_view_is_tailored_to_data_groups() {
        let temp_dir = TempDir::new().unwrap();
        let pool = ca_common::db::init_database(&temp_dir.path().join("ca.db"))
            .await
            .unwrap();

        let item = MediaItem {
            owner: Some(1),
            visibility: Some(Visibility::Private),
            url: Some("http://example.com/a.jpg".to_string()),
            ..MediaItem::new("g1")
        };
        media::insert_items(&pool, &[item.clone()]).await.unwrap();

        let mut keyword = MediaObject::keyword("k1", "cat");
        keyword.owner = Some(1);
        keyword.backend_id = Some(1);
        let mut face = MediaObject {
            media_type: Some(MediaType::Face),
            ..keyword.clone()
        };
        face.object_id = Some("f1".to_string());
        let mut inserts = vec![("g1".to_string(), keyword), ("g1".to_string(), face)];
        media::apply_object_changes(&pool, &mut inserts, &mut []).await.unwrap();

        let mut task = TaskDetails::analysis(Some(1), vec![item], None).unwrap();
        task.backends = BackendStatusList::with_status([1], TaskStatus::NotStarted);
        let task_id = tasks::insert_task(&pool, &task).await.unwrap();
        tasks::upsert_media_statuses(
            &pool,
            task_id,
            &[("g1".to_string(), BackendStatus::new(1, TaskStatus::Completed))],
        )
        .await
        .unwrap();

        let content = load_task_content(&pool, task_id).await.unwrap();

        let basic = content.view_for(&backend(&[DataGroup::Basic]), "http://cb/taskFinished");
        let items = basic.payload.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url.as_deref(), Some("http://example.com/a.jpg"));
        assert!(items[0].media_objects.is_empty());
        assert!(items[0].backend_status.is_empty());
        assert_eq!(basic.backend_id, Some(1));
        assert_eq!(basic.callback_uri.as_deref(), Some("http://cb/taskFinished"));

        let keywords = content.view_for(
            &backend(&[DataGroup::Keywords, DataGroup::Status]),
            "http://cb/taskFinished",
        );
        let items = keywords.payload.items();
        assert_eq!(items[0].media_objects.len(), 1);
        assert_eq!(items[0].media_objects[0].media_type, Some(MediaType::Keyword));
        assert_eq!(items[0].backend_status.len(), 1);

        let all = content.view_for(&backend(&[DataGroup::All]), "http://cb/taskFinished");
        assert_eq!(all.payload.items()[0].media_objects.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_task_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let pool = ca_common::db::init_database(&temp_dir.path().join("ca.db"))
            .await
            .unwrap();

        let result = load_task_content(&pool, 42).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
