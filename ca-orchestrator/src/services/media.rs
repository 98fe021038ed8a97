//! User-facing media operations
//!
//! Registering media for analysis, user edits of media objects, similarity
//! feedback and deletion. Every change a user makes is forwarded to the
//! feedback-capable backends as a Feedback task.

use ca_common::model::{
    FeedbackTaskBuilder, Guid, MediaItem, MediaObject, TaskDetails, TaskId, TaskParameters,
    UserId,
};
use ca_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::media::{self, AccessFilter};
use crate::services::dispatcher::TaskDispatcher;
use crate::services::identity::{IdentityResolver, Resolved};

/// Result of a user media update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub stale: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

pub struct MediaService {
    db: SqlitePool,
    resolver: IdentityResolver,
    dispatcher: Arc<TaskDispatcher>,
}

impl MediaService {
    pub fn new(db: SqlitePool, dispatcher: Arc<TaskDispatcher>) -> Self {
        Self {
            resolver: IdentityResolver::new(db.clone()),
            db,
            dispatcher,
        }
    }

    /// Register `items` and create an analysis task for them
    ///
    /// Items without GUID get a new one. A GUID already registered to another
    /// owner is rejected. Returns the task id and the GUIDs in input order.
    pub async fn submit_analysis(
        &self,
        owner: Option<UserId>,
        mut items: Vec<MediaItem>,
        parameters: Option<TaskParameters>,
    ) -> Result<(TaskId, Vec<Guid>)> {
        if items.is_empty() {
            return Err(Error::InvalidInput("no media items given".to_string()));
        }
        for item in items.iter_mut() {
            if item.guid.trim().is_empty() {
                item.guid = Uuid::new_v4().to_string();
            }
            item.owner = owner;
            item.media_objects.clear();
        }

        let guids: Vec<Guid> = items.iter().map(|i| i.guid.clone()).collect();
        for existing in media::get_items(&self.db, &guids).await? {
            if existing.owner != owner {
                return Err(Error::InvalidInput(format!(
                    "media {} belongs to another user",
                    existing.guid
                )));
            }
        }
        media::insert_items(&self.db, &items).await?;

        let task = TaskDetails::analysis(owner, items, parameters)?;
        let task_id = self.dispatcher.create_and_schedule(task).await?;
        Ok((task_id, guids))
    }

    /// Store user changes to media objects of items owned by `user`
    pub async fn update_media(&self, user: UserId, items: Vec<MediaItem>) -> Result<UpdateOutcome> {
        let guids: Vec<Guid> = items.iter().map(|i| i.guid.clone()).collect();
        let stored: HashMap<Guid, MediaItem> = media::get_items(&self.db, &guids)
            .await?
            .into_iter()
            .map(|i| (i.guid.clone(), i))
            .collect();

        let mut origins: Vec<Guid> = Vec::new();
        let mut objects: Vec<MediaObject> = Vec::new();
        let mut touched: Vec<Guid> = Vec::new();
        for item in items {
            let known = stored
                .get(&item.guid)
                .ok_or_else(|| Error::NotFound(format!("media {}", item.guid)))?;
            if known.owner != Some(user) {
                return Err(Error::InvalidInput(format!(
                    "media {} is not owned by user {}",
                    item.guid, user
                )));
            }
            if item.media_objects.is_empty() {
                continue;
            }
            touched.push(item.guid.clone());
            for mut object in item.media_objects {
                match object.owner {
                    Some(owner) if owner != user => {
                        return Err(Error::InvalidInput(format!(
                            "media object for {} has foreign owner {}",
                            item.guid, owner
                        )));
                    }
                    _ => object.owner = Some(user),
                }
                if object.visibility.is_none() {
                    object.visibility = known.visibility;
                }
                origins.push(item.guid.clone());
                objects.push(object);
            }
        }

        let resolution = self.resolver.resolve(&mut objects).await?;

        let mut inserts: Vec<(Guid, MediaObject)> = Vec::new();
        let mut updates: Vec<MediaObject> = Vec::new();
        for (index, (guid, object)) in origins.into_iter().zip(objects).enumerate() {
            match resolution.get(index) {
                Some(Resolved::Existing(existing)) => {
                    if existing.owner != Some(user) {
                        return Err(Error::IdentityConflict(format!(
                            "media object {} belongs to another user",
                            existing.media_object_id
                        )));
                    }
                    updates.push(object);
                }
                _ => inserts.push((guid, object)),
            }
        }

        for object in inserts.iter().map(|(_, o)| o).chain(updates.iter()) {
            object.validate().map_err(Error::InvalidPayload)?;
        }

        let summary = media::apply_object_changes(&self.db, &mut inserts, &mut updates).await?;

        let mut builder = FeedbackTaskBuilder::new().owner(user);
        for guid in touched {
            builder = builder.add_media(MediaItem::new(guid));
        }
        let task_id = self.dispatch_best_effort(builder.build()?).await;

        Ok(UpdateOutcome {
            inserted: summary.inserted,
            updated: summary.updated,
            stale: summary.stale,
            task_id,
        })
    }

    /// Forward a similarity judgement to the backends
    ///
    /// GUIDs the user cannot see are dropped. Returns `None` when nothing
    /// usable remains.
    pub async fn similarity_feedback(
        &self,
        user: UserId,
        reference: Vec<Guid>,
        similar: Vec<Guid>,
        dissimilar: Vec<Guid>,
    ) -> Result<Option<TaskId>> {
        let all: Vec<Guid> = reference
            .iter()
            .chain(&similar)
            .chain(&dissimilar)
            .cloned()
            .collect();
        let visible: HashSet<Guid> =
            media::search_accessible(&self.db, Some(user), &all, &AccessFilter::default())
                .await?
                .into_iter()
                .map(|i| i.guid)
                .collect();
        let keep = |guids: Vec<Guid>| -> Vec<MediaItem> {
            guids
                .into_iter()
                .filter(|g| visible.contains(g))
                .map(MediaItem::new)
                .collect()
        };

        let reference = keep(reference);
        let similar = keep(similar);
        let dissimilar = keep(dissimilar);
        if reference.is_empty() || (similar.is_empty() && dissimilar.is_empty()) {
            tracing::debug!(user, "Similarity feedback without usable media");
            return Ok(None);
        }

        let mut builder = FeedbackTaskBuilder::new().owner(user);
        for item in reference {
            builder = builder.add_reference(item);
        }
        for item in similar {
            builder = builder.add_similar(item);
        }
        for item in dissimilar {
            builder = builder.add_dissimilar(item);
        }

        match builder.build()? {
            Some(task) => Ok(Some(self.dispatcher.create_and_schedule(task).await?)),
            None => Ok(None),
        }
    }

    /// Delete items owned by `user` and notify the backends
    ///
    /// Unknown GUIDs are ignored. Returns the GUIDs removed and the task id.
    pub async fn delete_media(
        &self,
        user: UserId,
        guids: Vec<Guid>,
    ) -> Result<(Vec<Guid>, Option<TaskId>)> {
        let known = media::get_items(&self.db, &guids).await?;
        if let Some(foreign) = known.iter().find(|i| i.owner != Some(user)) {
            return Err(Error::InvalidInput(format!(
                "media {} is not owned by user {}",
                foreign.guid, user
            )));
        }
        let removed: Vec<Guid> = known.into_iter().map(|i| i.guid).collect();
        if removed.is_empty() {
            return Ok((removed, None));
        }

        media::delete_items(&self.db, &removed).await?;

        let mut builder = FeedbackTaskBuilder::new().owner(user);
        for guid in &removed {
            builder = builder.add_deleted(guid.clone());
        }
        let task_id = self.dispatch_best_effort(builder.build()?).await;
        Ok((removed, task_id))
    }

    /// Dispatch a feedback task for changes that are already stored
    async fn dispatch_best_effort(&self, task: Option<TaskDetails>) -> Option<TaskId> {
        let task = task?;
        match self.dispatcher.create_and_schedule(task).await {
            Ok(task_id) => Some(task_id),
            Err(e) => {
                tracing::warn!(error = %e, "Feedback task not created");
                None
            }
        }
    }
}
