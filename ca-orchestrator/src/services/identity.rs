//! Media object identity resolution
//!
//! An object submitted by a backend or a user is matched to its stored record
//! either by `media_object_id` or by its origin pair `(backend_id, object_id)`.
//! The stored record is authoritative for identity: `owner`, `object_id` and
//! `backend_id` are copied from it and any disagreement is logged as a
//! conflict, never silently merged.

use ca_common::model::{BackendId, ConfirmationStatus, MediaObject, UserId};
use ca_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};

use crate::db::media;

/// Identity of a stored object, as needed to enforce mutability rules
#[derive(Debug, Clone, PartialEq)]
pub struct StoredIdentity {
    pub media_object_id: String,
    pub owner: Option<UserId>,
    pub backend_id: Option<BackendId>,
    pub confirmation_status: Option<ConfirmationStatus>,
}

impl StoredIdentity {
    fn of(object: &MediaObject) -> Option<Self> {
        Some(Self {
            media_object_id: object.media_object_id.clone()?,
            owner: object.owner,
            backend_id: object.backend_id,
            confirmation_status: object.confirmation_status,
        })
    }

    /// Whether `backend_id` may still change this object
    pub fn mutable_by_backend(&self, backend_id: BackendId) -> bool {
        self.backend_id == Some(backend_id)
            && self.confirmation_status != Some(ConfirmationStatus::UserConfirmed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// No stored record; the object is a new-object candidate
    New,
    Existing(StoredIdentity),
}

/// Per-object outcome, index aligned with the resolved slice
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    outcomes: Vec<Resolved>,
}

impl Resolution {
    pub fn get(&self, index: usize) -> Option<&Resolved> {
        self.outcomes.get(index)
    }

    #[cfg(test)]
    fn existing_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|r| matches!(r, Resolved::Existing(_)))
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct IdentityResolver {
    db: SqlitePool,
}

impl IdentityResolver {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Match `objects` to stored records, updating their identity in place
    ///
    /// Resolving an already resolved slice changes nothing.
    pub async fn resolve(&self, objects: &mut [MediaObject]) -> Result<Resolution> {
        let ids: Vec<String> = objects
            .iter()
            .filter_map(|o| o.media_object_id.clone())
            .collect();
        let by_id: HashMap<String, MediaObject> = media::get_objects_by_ids(&self.db, &ids)
            .await?
            .into_iter()
            .filter_map(|o| o.media_object_id.clone().map(|id| (id, o)))
            .collect();

        for object in objects.iter_mut() {
            if let Some(id) = &object.media_object_id {
                if !by_id.contains_key(id) {
                    tracing::warn!(
                        media_object_id = %id,
                        "Unknown media object id, falling back to origin lookup"
                    );
                    object.media_object_id = None;
                }
            }
        }

        let by_origin = self.load_by_origin(objects).await?;

        let mut outcomes = Vec::with_capacity(objects.len());
        for object in objects.iter_mut() {
            let stored = match &object.media_object_id {
                Some(id) => by_id.get(id),
                None => object.object_id.as_ref().and_then(|object_id| {
                    pick_origin_match(
                        by_origin.get(&(object.backend_id, object_id.clone())),
                        object.owner,
                    )
                }),
            };

            match stored.and_then(|s| StoredIdentity::of(s).map(|identity| (s, identity))) {
                Some((stored, identity)) => {
                    adopt_identity(object, stored);
                    outcomes.push(Resolved::Existing(identity));
                }
                None => outcomes.push(Resolved::New),
            }
        }

        Ok(Resolution { outcomes })
    }

    async fn load_by_origin(
        &self,
        objects: &[MediaObject],
    ) -> Result<HashMap<(Option<BackendId>, String), Vec<MediaObject>>> {
        let mut wanted: HashMap<Option<BackendId>, BTreeSet<String>> = HashMap::new();
        for object in objects.iter().filter(|o| o.media_object_id.is_none()) {
            if let Some(object_id) = &object.object_id {
                wanted
                    .entry(object.backend_id)
                    .or_default()
                    .insert(object_id.clone());
            }
        }

        let mut out: HashMap<(Option<BackendId>, String), Vec<MediaObject>> = HashMap::new();
        for (backend_id, object_ids) in wanted {
            let object_ids: Vec<String> = object_ids.into_iter().collect();
            for stored in media::get_objects_by_origin(&self.db, backend_id, &object_ids).await? {
                if let Some(object_id) = stored.object_id.clone() {
                    out.entry((backend_id, object_id)).or_default().push(stored);
                }
            }
        }
        Ok(out)
    }
}

/// Prefer a record with the same owner when several share an origin pair
fn pick_origin_match(candidates: Option<&Vec<MediaObject>>, owner: Option<UserId>) -> Option<&MediaObject> {
    let candidates = candidates?;
    candidates
        .iter()
        .find(|c| owner.is_some() && c.owner == owner)
        .or_else(|| candidates.first())
}

fn adopt_identity(object: &mut MediaObject, stored: &MediaObject) {
    if object.owner.is_some() && object.owner != stored.owner {
        let conflict = Error::IdentityConflict(format!(
            "owner {:?} differs from stored owner {:?}",
            object.owner, stored.owner
        ));
        tracing::warn!(media_object_id = ?stored.media_object_id, error = %conflict, "Identity conflict");
    }
    if object.object_id.is_some() && object.object_id != stored.object_id {
        let conflict = Error::IdentityConflict(format!(
            "object id {:?} differs from stored object id {:?}",
            object.object_id, stored.object_id
        ));
        tracing::warn!(media_object_id = ?stored.media_object_id, error = %conflict, "Identity conflict");
    }
    if object.backend_id != stored.backend_id {
        let conflict = Error::IdentityConflict(format!(
            "backend {:?} differs from stored backend {:?}",
            object.backend_id, stored.backend_id
        ));
        tracing::warn!(media_object_id = ?stored.media_object_id, error = %conflict, "Identity conflict");
    }

    object.media_object_id = stored.media_object_id.clone();
    object.owner = stored.owner;
    object.object_id = stored.object_id.clone();
    object.backend_id = stored.backend_id;
}
