//! Task persistence
//!
//! Tasks are stored as a header row plus per-backend status rows, metadata
//! rows and the GUIDs of the payload lists. Media content itself lives in the
//! media tables and is joined in when a task view is built.

use ca_common::db::{from_millis, to_millis};
use ca_common::model::{
    BackendId, BackendStatus, BackendStatusList, Guid, PayloadList, TaskDetails, TaskId,
    TaskParameters, TaskStatus, TaskType, UserId,
};
use ca_common::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use std::collections::BTreeMap;

/// Task row without payload
#[derive(Debug, Clone, Serialize)]
pub struct TaskHeader {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub owner: Option<UserId>,
    pub parameters: Option<TaskParameters>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct TaskRow {
    task_id: i64,
    task_type: i64,
    owner: Option<i64>,
    parameters: Option<String>,
    created_ms: i64,
    updated_ms: i64,
}

#[derive(Debug, FromRow)]
struct StatusRow {
    backend_id: i64,
    status: i64,
    message: Option<String>,
}

impl From<StatusRow> for BackendStatus {
    fn from(row: StatusRow) -> Self {
        BackendStatus {
            backend_id: row.backend_id,
            status: TaskStatus::from_code(row.status),
            message: row.message,
        }
    }
}

/// Persist a new task with its backend statuses, metadata and payload GUIDs
///
/// Returns the assigned task id. Everything is written in one transaction.
pub async fn insert_task(pool: &SqlitePool, task: &TaskDetails) -> Result<TaskId> {
    let now = to_millis(Utc::now());
    let parameters = task
        .parameters
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let mut tx = pool.begin().await?;

    let task_id = sqlx::query(
        "INSERT INTO tasks (task_type, owner, parameters, created_ms, updated_ms) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(task.task_type.code())
    .bind(task.owner)
    .bind(parameters)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    for status in &task.backends {
        sqlx::query(
            "INSERT INTO task_backends (task_id, backend_id, status, message, updated_ms) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(task_id)
        .bind(status.backend_id)
        .bind(status.status.code())
        .bind(&status.message)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    for (name, value) in &task.metadata {
        sqlx::query("INSERT INTO task_metadata (task_id, name, value) VALUES (?, ?, ?)")
            .bind(task_id)
            .bind(name)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    for (position, (list, guid)) in task.payload.entries().into_iter().enumerate() {
        sqlx::query(
            "INSERT OR IGNORE INTO task_media (task_id, list_kind, guid, position) VALUES (?, ?, ?, ?)",
        )
        .bind(task_id)
        .bind(list.as_str())
        .bind(guid)
        .bind(position as i64)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::debug!(task_id, task_type = %task.task_type, backends = task.backends.len(), "Task inserted");
    Ok(task_id)
}

pub async fn get_task_header(pool: &SqlitePool, task_id: TaskId) -> Result<Option<TaskHeader>> {
    let row = sqlx::query_as::<_, TaskRow>(
        "SELECT task_id, task_type, owner, parameters, created_ms, updated_ms FROM tasks WHERE task_id = ?",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| -> Result<TaskHeader> {
        let parameters: Option<TaskParameters> = row
            .parameters
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(TaskHeader {
            task_id: row.task_id,
            task_type: TaskType::from_code(row.task_type),
            owner: row.owner,
            parameters,
            created: from_millis(row.created_ms),
            updated: from_millis(row.updated_ms),
        })
    })
    .transpose()
}

/// Backend statuses of a task, optionally only those in `status`
pub async fn get_backend_statuses(
    pool: &SqlitePool,
    task_id: TaskId,
    status: Option<TaskStatus>,
) -> Result<BackendStatusList> {
    let rows = match status {
        Some(status) => {
            sqlx::query_as::<_, StatusRow>(
                "SELECT backend_id, status, message FROM task_backends WHERE task_id = ? AND status = ? ORDER BY backend_id",
            )
            .bind(task_id)
            .bind(status.code())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, StatusRow>(
                "SELECT backend_id, status, message FROM task_backends WHERE task_id = ? ORDER BY backend_id",
            )
            .bind(task_id)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows.into_iter().map(BackendStatus::from).collect())
}

pub async fn get_backend_status(
    pool: &SqlitePool,
    task_id: TaskId,
    backend_id: BackendId,
) -> Result<Option<BackendStatus>> {
    let row = sqlx::query_as::<_, StatusRow>(
        "SELECT backend_id, status, message FROM task_backends WHERE task_id = ? AND backend_id = ?",
    )
    .bind(task_id)
    .bind(backend_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(BackendStatus::from))
}

/// Write the statuses of one round in a single transaction
///
/// Only backends already assigned to the task are updated; a status for an
/// unassigned backend is an error and rolls the whole batch back.
pub async fn update_backend_statuses(
    pool: &SqlitePool,
    task_id: TaskId,
    statuses: &BackendStatusList,
) -> Result<()> {
    let now = to_millis(Utc::now());
    let mut tx = pool.begin().await?;

    for status in statuses {
        let affected = sqlx::query(
            "UPDATE task_backends SET status = ?, message = ?, updated_ms = ? WHERE task_id = ? AND backend_id = ?",
        )
        .bind(status.status.code())
        .bind(&status.message)
        .bind(now)
        .bind(task_id)
        .bind(status.backend_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(Error::UnexpectedBackend {
                task_id,
                backend_id: status.backend_id,
            });
        }
    }

    sqlx::query("UPDATE tasks SET updated_ms = ? WHERE task_id = ?")
        .bind(now)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn get_metadata(pool: &SqlitePool, task_id: TaskId) -> Result<BTreeMap<String, String>> {
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT name, value FROM task_metadata WHERE task_id = ?",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

/// Payload GUIDs of a task in insertion order
pub async fn get_payload_entries(
    pool: &SqlitePool,
    task_id: TaskId,
) -> Result<Vec<(PayloadList, Guid)>> {
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT list_kind, guid FROM task_media WHERE task_id = ? ORDER BY position",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(kind, guid)| -> Result<(PayloadList, Guid)> { Ok((kind.parse()?, guid)) })
        .collect()
}

/// Record per-item processing status for one backend within a task
pub async fn upsert_media_statuses(
    pool: &SqlitePool,
    task_id: TaskId,
    statuses: &[(Guid, BackendStatus)],
) -> Result<()> {
    if statuses.is_empty() {
        return Ok(());
    }
    let now = to_millis(Utc::now());
    let mut tx = pool.begin().await?;

    for (guid, status) in statuses {
        sqlx::query(
            r#"
            INSERT INTO media_status (task_id, guid, backend_id, status, message, updated_ms)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_id, guid, backend_id) DO UPDATE SET
                status = excluded.status,
                message = excluded.message,
                updated_ms = excluded.updated_ms
            "#,
        )
        .bind(task_id)
        .bind(guid)
        .bind(status.backend_id)
        .bind(status.status.code())
        .bind(&status.message)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Per-item statuses recorded for a task, keyed by GUID
pub async fn get_media_statuses(
    pool: &SqlitePool,
    task_id: TaskId,
    guids: &[Guid],
) -> Result<BTreeMap<Guid, BackendStatusList>> {
    let mut out: BTreeMap<Guid, BackendStatusList> = BTreeMap::new();
    if guids.is_empty() {
        return Ok(out);
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT guid, backend_id, status, message FROM media_status WHERE task_id = ",
    );
    qb.push_bind(task_id);
    qb.push(" AND guid IN (");
    let mut separated = qb.separated(", ");
    for guid in guids {
        separated.push_bind(guid.clone());
    }
    separated.push_unseparated(") ORDER BY backend_id");

    let rows = qb
        .build_query_as::<(String, i64, i64, Option<String>)>()
        .fetch_all(pool)
        .await?;

    for (guid, backend_id, status, message) in rows {
        out.entry(guid).or_default().set(BackendStatus {
            backend_id,
            status: TaskStatus::from_code(status),
            message,
        });
    }
    Ok(out)
}

/// Tasks created before `created_before` that still have undelivered backends
pub async fn tasks_pending_delivery(
    pool: &SqlitePool,
    created_before: DateTime<Utc>,
) -> Result<Vec<TaskId>> {
    let ids = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT DISTINCT t.task_id
        FROM tasks t
        JOIN task_backends tb ON tb.task_id = t.task_id
        WHERE tb.status = ? AND t.created_ms <= ?
        ORDER BY t.task_id
        "#,
    )
    .bind(TaskStatus::NotStarted.code())
    .bind(to_millis(created_before))
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ca_common::model::{FeedbackTaskBuilder, MediaItem};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool) {
        let temp_dir = TempDir::new().unwrap();
        let pool = ca_common::db::init_database(&temp_dir.path().join("ca.db"))
            .await
            .unwrap();
        (temp_dir, pool)
    }

    fn analysis_task(backends: &[BackendId]) -> TaskDetails {
        let mut task = TaskDetails::analysis(
            Some(10),
            vec![MediaItem::new("g1"), MediaItem::new("g2")],
            Some(TaskParameters::default()),
        )
        .unwrap();
        task.backends = BackendStatusList::with_status(backends.iter().copied(), TaskStatus::NotStarted);
        task.metadata.insert("origin".to_string(), "test".to_string());
        task
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let (_dir, pool) = setup().await;
        let task_id = insert_task(&pool, &analysis_task(&[1, 2])).await.unwrap();

        let header = get_task_header(&pool, task_id).await.unwrap().unwrap();
        assert_eq!(header.task_type, TaskType::Analysis);
        assert_eq!(header.owner, Some(10));

        let statuses = get_backend_statuses(&pool, task_id, None).await.unwrap();
        assert_eq!(statuses.backend_ids(), vec![1, 2]);
        assert_eq!(statuses.combined(), Some(TaskStatus::NotStarted));

        let entries = get_payload_entries(&pool, task_id).await.unwrap();
        assert_eq!(
            entries,
            vec![
                (PayloadList::Media, "g1".to_string()),
                (PayloadList::Media, "g2".to_string())
            ]
        );
        assert_eq!(get_metadata(&pool, task_id).await.unwrap()["origin"], "test");
    }

    #[tokio::test]
    async fn test_batch_status_update_is_all_or_nothing() {
        let (_dir, pool) = setup().await;
        let task_id = insert_task(&pool, &analysis_task(&[1, 2])).await.unwrap();

        let mut round = BackendStatusList::new();
        round.set(BackendStatus::new(1, TaskStatus::Executing));
        round.set(BackendStatus::new(99, TaskStatus::Executing));
        let result = update_backend_statuses(&pool, task_id, &round).await;
        assert!(matches!(result, Err(Error::UnexpectedBackend { backend_id: 99, .. })));

        let status = get_backend_status(&pool, task_id, 1).await.unwrap().unwrap();
        assert_eq!(status.status, TaskStatus::NotStarted);

        round.remove(99);
        update_backend_statuses(&pool, task_id, &round).await.unwrap();
        let not_started = get_backend_statuses(&pool, task_id, Some(TaskStatus::NotStarted))
            .await
            .unwrap();
        assert_eq!(not_started.backend_ids(), vec![2]);
    }

    #[tokio::test]
    async fn test_deleted_payload_and_pending_sweep() {
        let (_dir, pool) = setup().await;
        let mut task = FeedbackTaskBuilder::new()
            .owner(1)
            .add_deleted("gone")
            .build()
            .unwrap()
            .unwrap();
        task.backends = BackendStatusList::with_status([3], TaskStatus::NotStarted);
        let task_id = insert_task(&pool, &task).await.unwrap();

        let entries = get_payload_entries(&pool, task_id).await.unwrap();
        assert_eq!(entries, vec![(PayloadList::Deleted, "gone".to_string())]);

        let pending = tasks_pending_delivery(&pool, Utc::now()).await.unwrap();
        assert_eq!(pending, vec![task_id]);

        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(tasks_pending_delivery(&pool, past).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_media_status_upsert() {
        let (_dir, pool) = setup().await;
        let task_id = insert_task(&pool, &analysis_task(&[1])).await.unwrap();

        upsert_media_statuses(
            &pool,
            task_id,
            &[("g1".to_string(), BackendStatus::new(1, TaskStatus::Executing))],
        )
        .await
        .unwrap();
        upsert_media_statuses(
            &pool,
            task_id,
            &[("g1".to_string(), BackendStatus::new(1, TaskStatus::Completed))],
        )
        .await
        .unwrap();

        let statuses = get_media_statuses(&pool, task_id, &["g1".to_string(), "g2".to_string()])
            .await
            .unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses["g1"].combined(), Some(TaskStatus::Completed));
    }
}
