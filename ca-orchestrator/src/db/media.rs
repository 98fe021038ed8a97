//! Media item and media object persistence

use ca_common::db::{from_millis, to_millis};
use ca_common::model::{
    BackendId, ConfirmationStatus, Guid, MediaItem, MediaObject, MediaType, ServiceType, UserId,
    Visibility,
};
use ca_common::{Error, Result};
use chrono::Utc;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

const OBJECT_COLUMNS: &str = "o.media_object_id, o.backend_id, o.object_id, o.owner, o.media_type, o.status, o.value, o.name, o.confidence, o.rank, o.visibility, o.shape, o.timecodes, o.updated_ms";

#[derive(Debug, FromRow)]
struct ItemRow {
    guid: String,
    owner: Option<i64>,
    service_type: Option<i64>,
    visibility: i64,
    url: Option<String>,
    updated_ms: i64,
}

impl From<ItemRow> for MediaItem {
    fn from(row: ItemRow) -> Self {
        MediaItem {
            guid: row.guid,
            owner: row.owner,
            service_type: row.service_type.and_then(ServiceType::from_code),
            visibility: Visibility::from_code(row.visibility),
            url: row.url,
            updated: Some(from_millis(row.updated_ms)),
            ..Default::default()
        }
    }
}

#[derive(Debug, FromRow)]
struct ObjectRow {
    media_object_id: String,
    backend_id: Option<i64>,
    object_id: String,
    owner: i64,
    media_type: i64,
    status: i64,
    value: Option<String>,
    name: Option<String>,
    confidence: Option<f64>,
    rank: Option<i64>,
    visibility: i64,
    shape: Option<String>,
    timecodes: Option<String>,
    updated_ms: i64,
}

impl ObjectRow {
    fn into_object(self) -> Result<MediaObject> {
        let shape = self.shape.as_deref().map(serde_json::from_str).transpose()?;
        let timecodes = match self.timecodes.as_deref() {
            Some(json) => serde_json::from_str(json)?,
            None => Vec::new(),
        };
        Ok(MediaObject {
            media_object_id: Some(self.media_object_id),
            backend_id: self.backend_id,
            object_id: Some(self.object_id),
            owner: Some(self.owner),
            media_type: MediaType::from_code(self.media_type),
            confirmation_status: ConfirmationStatus::from_code(self.status),
            value: self.value,
            name: self.name,
            confidence: self.confidence,
            rank: self.rank,
            visibility: Visibility::from_code(self.visibility),
            shape,
            timecodes,
            updated: Some(from_millis(self.updated_ms)),
        })
    }
}

#[derive(Debug, FromRow)]
struct AssociatedObjectRow {
    guid: String,
    #[sqlx(flatten)]
    object: ObjectRow,
}

/// Restrictions applied when resolving media for a caller
#[derive(Debug, Clone, Default)]
pub struct AccessFilter {
    /// Only items from these services (all when empty)
    pub service_types: Vec<ServiceType>,
    /// Only items owned by these users (all when empty)
    pub user_ids: Vec<UserId>,
}

/// Outcome of writing a batch of object changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub inserted: usize,
    pub updated: usize,
    /// Updates skipped because the stored record is newer or changed identity
    pub stale: usize,
}

fn push_in_list<'a, T>(qb: &mut QueryBuilder<'a, Sqlite>, values: &[T])
where
    T: Clone + Send + 'a + sqlx::Encode<'a, Sqlite> + sqlx::Type<Sqlite>,
{
    qb.push("(");
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(value.clone());
    }
    separated.push_unseparated(")");
}

/// Register media items; already known GUIDs are left untouched
///
/// Items without owner belong to anonymous tasks and are only visible when
/// public. Returns the number of newly registered items.
pub async fn insert_items(pool: &SqlitePool, items: &[MediaItem]) -> Result<u64> {
    let now = to_millis(Utc::now());
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for item in items {
        inserted += sqlx::query(
            r#"
            INSERT INTO media_items (guid, owner, service_type, visibility, url, updated_ms)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(guid) DO NOTHING
            "#,
        )
        .bind(&item.guid)
        .bind(item.owner)
        .bind(item.service_type.map(ServiceType::code))
        .bind(item.visibility.unwrap_or_default().code())
        .bind(&item.url)
        .bind(item.updated.map(to_millis).unwrap_or(now))
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Stored items for the given GUIDs, without media objects
pub async fn get_items(pool: &SqlitePool, guids: &[Guid]) -> Result<Vec<MediaItem>> {
    if guids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT guid, owner, service_type, visibility, url, updated_ms FROM media_items WHERE guid IN ",
    );
    push_in_list(&mut qb, guids);

    let rows = qb.build_query_as::<ItemRow>().fetch_all(pool).await?;
    Ok(rows.into_iter().map(MediaItem::from).collect())
}

/// Media objects associated with each of the given items
pub async fn get_item_objects(
    pool: &SqlitePool,
    guids: &[Guid],
) -> Result<HashMap<Guid, Vec<MediaObject>>> {
    let mut out: HashMap<Guid, Vec<MediaObject>> = HashMap::new();
    if guids.is_empty() {
        return Ok(out);
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT io.guid, {} FROM item_objects io JOIN media_objects o ON o.media_object_id = io.media_object_id WHERE io.guid IN ",
        OBJECT_COLUMNS
    ));
    push_in_list(&mut qb, guids);
    qb.push(" ORDER BY o.rank, o.media_object_id");

    let rows = qb.build_query_as::<AssociatedObjectRow>().fetch_all(pool).await?;
    for row in rows {
        out.entry(row.guid).or_default().push(row.object.into_object()?);
    }
    Ok(out)
}

/// Stored objects with the given media object ids
pub async fn get_objects_by_ids(pool: &SqlitePool, ids: &[String]) -> Result<Vec<MediaObject>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM media_objects o WHERE o.media_object_id IN ",
        OBJECT_COLUMNS
    ));
    push_in_list(&mut qb, ids);

    let rows = qb.build_query_as::<ObjectRow>().fetch_all(pool).await?;
    rows.into_iter().map(ObjectRow::into_object).collect()
}

/// Stored objects created by `backend_id` (or by users when `None`) with the given object ids
pub async fn get_objects_by_origin(
    pool: &SqlitePool,
    backend_id: Option<BackendId>,
    object_ids: &[String],
) -> Result<Vec<MediaObject>> {
    if object_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM media_objects o WHERE o.backend_id IS ",
        OBJECT_COLUMNS
    ));
    qb.push_bind(backend_id);
    qb.push(" AND o.object_id IN ");
    push_in_list(&mut qb, object_ids);

    let rows = qb.build_query_as::<ObjectRow>().fetch_all(pool).await?;
    rows.into_iter().map(ObjectRow::into_object).collect()
}

/// Write new and changed objects in one transaction
///
/// Inserted objects get a fresh `media_object_id` and are associated with the
/// item they were submitted for. Updates never create associations and only
/// apply when the submitted `updated` timestamp is not older than the stored
/// one and the object identity (owner, origin) is unchanged.
pub async fn apply_object_changes(
    pool: &SqlitePool,
    inserts: &mut [(Guid, MediaObject)],
    updates: &mut [MediaObject],
) -> Result<ChangeSummary> {
    let now = Utc::now();
    let mut summary = ChangeSummary::default();
    let mut tx = pool.begin().await?;

    for (guid, object) in inserts.iter_mut() {
        let media_object_id = Uuid::new_v4().to_string();
        let updated = *object.updated.get_or_insert(now);
        let fields = StoredFields::from_object(object)?;

        sqlx::query(
            r#"
            INSERT INTO media_objects (media_object_id, backend_id, object_id, owner, media_type, status,
                value, name, confidence, rank, visibility, shape, timecodes, updated_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&media_object_id)
        .bind(object.backend_id)
        .bind(&object.object_id)
        .bind(object.owner)
        .bind(fields.media_type)
        .bind(fields.status)
        .bind(&object.value)
        .bind(&object.name)
        .bind(object.confidence)
        .bind(object.rank)
        .bind(fields.visibility)
        .bind(&fields.shape)
        .bind(&fields.timecodes)
        .bind(to_millis(updated))
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO item_objects (guid, media_object_id) VALUES (?, ?)")
            .bind(&*guid)
            .bind(&media_object_id)
            .execute(&mut *tx)
            .await?;

        object.media_object_id = Some(media_object_id);
        summary.inserted += 1;
    }

    for object in updates.iter_mut() {
        let media_object_id = object.media_object_id.clone().ok_or_else(|| {
            Error::Internal("update of media object without media_object_id".to_string())
        })?;
        let updated = *object.updated.get_or_insert(now);
        let fields = StoredFields::from_object(object)?;

        let affected = sqlx::query(
            r#"
            UPDATE media_objects SET
                media_type = ?, status = ?, value = ?, name = ?, confidence = ?, rank = ?,
                visibility = ?, shape = ?, timecodes = ?, updated_ms = ?
            WHERE media_object_id = ? AND owner IS ? AND object_id IS ? AND backend_id IS ?
                AND updated_ms <= ?
            "#,
        )
        .bind(fields.media_type)
        .bind(fields.status)
        .bind(&object.value)
        .bind(&object.name)
        .bind(object.confidence)
        .bind(object.rank)
        .bind(fields.visibility)
        .bind(&fields.shape)
        .bind(&fields.timecodes)
        .bind(to_millis(updated))
        .bind(&media_object_id)
        .bind(object.owner)
        .bind(&object.object_id)
        .bind(object.backend_id)
        .bind(to_millis(updated))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if affected == 0 {
            tracing::debug!(media_object_id = %media_object_id, "Skipped stale media object update");
            summary.stale += 1;
        } else {
            summary.updated += 1;
        }
    }

    tx.commit().await?;
    Ok(summary)
}

/// Column values derived from a validated object
struct StoredFields {
    media_type: i64,
    status: i64,
    visibility: i64,
    shape: Option<String>,
    timecodes: Option<String>,
}

impl StoredFields {
    fn from_object(object: &MediaObject) -> Result<Self> {
        let media_type = object
            .media_type
            .ok_or_else(|| Error::InvalidPayload("media object without media_type".to_string()))?;
        let status = object.confirmation_status.ok_or_else(|| {
            Error::InvalidPayload("media object without confirmation_status".to_string())
        })?;
        let shape = object.shape.as_ref().map(serde_json::to_string).transpose()?;
        let timecodes = if object.timecodes.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&object.timecodes)?)
        };
        Ok(Self {
            media_type: media_type.code(),
            status: status.code(),
            visibility: object.visibility.unwrap_or_default().code(),
            shape,
            timecodes,
        })
    }
}

/// Items among `guids` the caller may see, in no particular order
///
/// An item is visible when it is public or owned by `user`. Anonymous callers
/// only see public items.
pub async fn search_accessible(
    pool: &SqlitePool,
    user: Option<UserId>,
    guids: &[Guid],
    filter: &AccessFilter,
) -> Result<Vec<MediaItem>> {
    if guids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT guid, owner, service_type, visibility, url, updated_ms FROM media_items WHERE guid IN ",
    );
    push_in_list(&mut qb, guids);

    qb.push(" AND (visibility = ");
    qb.push_bind(Visibility::Public.code());
    if let Some(user) = user {
        qb.push(" OR owner = ");
        qb.push_bind(user);
    }
    qb.push(")");

    if !filter.service_types.is_empty() {
        qb.push(" AND service_type IN (");
        let mut separated = qb.separated(", ");
        for service_type in &filter.service_types {
            separated.push_bind(service_type.code());
        }
        separated.push_unseparated(")");
    }
    if !filter.user_ids.is_empty() {
        qb.push(" AND owner IN ");
        push_in_list(&mut qb, &filter.user_ids);
    }

    let rows = qb.build_query_as::<ItemRow>().fetch_all(pool).await?;
    Ok(rows.into_iter().map(MediaItem::from).collect())
}

/// Remove items and the media objects associated with them
///
/// Returns the number of removed items.
pub async fn delete_items(pool: &SqlitePool, guids: &[Guid]) -> Result<u64> {
    if guids.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "DELETE FROM media_objects WHERE media_object_id IN (SELECT media_object_id FROM item_objects WHERE guid IN ",
    );
    push_in_list(&mut qb, guids);
    qb.push(")");
    qb.build().execute(&mut *tx).await?;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM media_items WHERE guid IN ");
    push_in_list(&mut qb, guids);
    let removed = qb.build().execute(&mut *tx).await?.rows_affected();

    tx.commit().await?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool) {
        let temp_dir = TempDir::new().unwrap();
        let pool = ca_common::db::init_database(&temp_dir.path().join("ca.db"))
            .await
            .unwrap();
        (temp_dir, pool)
    }

    fn item(guid: &str, owner: UserId, visibility: Visibility) -> MediaItem {
        MediaItem {
            owner: Some(owner),
            visibility: Some(visibility),
            service_type: Some(ServiceType::UrlStorage),
            ..MediaItem::new(guid)
        }
    }

    fn backend_keyword(backend_id: BackendId, object_id: &str, value: &str) -> MediaObject {
        MediaObject {
            backend_id: Some(backend_id),
            owner: Some(1),
            ..MediaObject::keyword(object_id, value)
        }
    }

    #[tokio::test]
    async fn test_insert_items_keeps_existing() {
        let (_dir, pool) = setup().await;
        assert_eq!(insert_items(&pool, &[item("a", 1, Visibility::Private)]).await.unwrap(), 1);
        assert_eq!(insert_items(&pool, &[item("a", 2, Visibility::Public)]).await.unwrap(), 0);

        let items = get_items(&pool, &["a".to_string()]).await.unwrap();
        assert_eq!(items[0].owner, Some(1));
        assert_eq!(items[0].visibility, Some(Visibility::Private));

        let anonymous = MediaItem::new("b");
        assert_eq!(insert_items(&pool, &[anonymous]).await.unwrap(), 1);
        let items = get_items(&pool, &["b".to_string()]).await.unwrap();
        assert_eq!(items[0].owner, None);
    }

    #[tokio::test]
    async fn test_insert_associates_and_lookups_find_object() {
        let (_dir, pool) = setup().await;
        insert_items(&pool, &[item("a", 1, Visibility::Private)]).await.unwrap();

        let mut inserts = vec![("a".to_string(), backend_keyword(3, "k1", "cat"))];
        let summary = apply_object_changes(&pool, &mut inserts, &mut []).await.unwrap();
        assert_eq!(summary.inserted, 1);
        let id = inserts[0].1.media_object_id.clone().unwrap();

        let by_id = get_objects_by_ids(&pool, &[id.clone()]).await.unwrap();
        assert_eq!(by_id[0].value.as_deref(), Some("cat"));

        let by_origin = get_objects_by_origin(&pool, Some(3), &["k1".to_string()]).await.unwrap();
        assert_eq!(by_origin[0].media_object_id.as_deref(), Some(id.as_str()));
        assert!(get_objects_by_origin(&pool, None, &["k1".to_string()]).await.unwrap().is_empty());

        let objects = get_item_objects(&pool, &["a".to_string()]).await.unwrap();
        assert_eq!(objects["a"].len(), 1);
    }

    #[tokio::test]
    async fn test_update_if_newer() {
        let (_dir, pool) = setup().await;
        insert_items(&pool, &[item("a", 1, Visibility::Private)]).await.unwrap();
        let mut inserts = vec![("a".to_string(), backend_keyword(3, "k1", "cat"))];
        apply_object_changes(&pool, &mut inserts, &mut []).await.unwrap();
        let stored = inserts[0].1.clone();

        let mut older = stored.clone();
        older.value = Some("dog".to_string());
        older.updated = stored.updated.map(|t| t - chrono::Duration::seconds(10));
        let summary = apply_object_changes(&pool, &mut [], &mut [older]).await.unwrap();
        assert_eq!(summary.stale, 1);

        let mut newer = stored.clone();
        newer.value = Some("lion".to_string());
        newer.updated = stored.updated.map(|t| t + chrono::Duration::seconds(10));
        let summary = apply_object_changes(&pool, &mut [], &mut [newer]).await.unwrap();
        assert_eq!(summary.updated, 1);

        let id = stored.media_object_id.unwrap();
        let current = get_objects_by_ids(&pool, &[id]).await.unwrap();
        assert_eq!(current[0].value.as_deref(), Some("lion"));
    }

    #[tokio::test]
    async fn test_search_accessible_honours_visibility_and_filters() {
        let (_dir, pool) = setup().await;
        insert_items(
            &pool,
            &[
                item("mine", 1, Visibility::Private),
                item("public", 2, Visibility::Public),
                item("hidden", 2, Visibility::Private),
            ],
        )
        .await
        .unwrap();
        let guids: Vec<Guid> = ["mine", "public", "hidden"].iter().map(|s| s.to_string()).collect();

        let mut visible: Vec<Guid> = search_accessible(&pool, Some(1), &guids, &AccessFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.guid)
            .collect();
        visible.sort();
        assert_eq!(visible, vec!["mine".to_string(), "public".to_string()]);

        let anonymous = search_accessible(&pool, None, &guids, &AccessFilter::default())
            .await
            .unwrap();
        assert_eq!(anonymous.len(), 1);

        let filtered = search_accessible(
            &pool,
            Some(1),
            &guids,
            &AccessFilter {
                service_types: vec![ServiceType::Picasa],
                user_ids: vec![],
            },
        )
        .await
        .unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn test_delete_items_removes_objects() {
        let (_dir, pool) = setup().await;
        insert_items(&pool, &[item("a", 1, Visibility::Private)]).await.unwrap();
        let mut inserts = vec![("a".to_string(), backend_keyword(3, "k1", "cat"))];
        apply_object_changes(&pool, &mut inserts, &mut []).await.unwrap();

        assert_eq!(delete_items(&pool, &["a".to_string()]).await.unwrap(), 1);
        assert!(get_items(&pool, &["a".to_string()]).await.unwrap().is_empty());
        assert!(get_objects_by_origin(&pool, Some(3), &["k1".to_string()]).await.unwrap().is_empty());
    }
}
