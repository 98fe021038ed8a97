//! Backend registry persistence

use ca_common::model::{Backend, BackendId, Capability, DataGroups};
use ca_common::Result;
use sqlx::{FromRow, SqlitePool};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, FromRow)]
struct BackendRow {
    backend_id: i64,
    endpoint: String,
    enabled: bool,
    description: Option<String>,
    default_data_groups: String,
}

#[derive(Debug, FromRow)]
struct CapabilityRow {
    backend_id: i64,
    capability: String,
}

/// Insert or replace a backend and its capability set
pub async fn upsert_backend(pool: &SqlitePool, backend: &Backend) -> Result<()> {
    let data_groups = serde_json::to_string(&backend.default_data_groups)?;
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO backends (backend_id, endpoint, enabled, description, default_data_groups)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(backend_id) DO UPDATE SET
            endpoint = excluded.endpoint,
            enabled = excluded.enabled,
            description = excluded.description,
            default_data_groups = excluded.default_data_groups
        "#,
    )
    .bind(backend.backend_id)
    .bind(&backend.endpoint)
    .bind(backend.enabled)
    .bind(&backend.description)
    .bind(&data_groups)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM backend_capabilities WHERE backend_id = ?")
        .bind(backend.backend_id)
        .execute(&mut *tx)
        .await?;

    for capability in &backend.capabilities {
        sqlx::query("INSERT INTO backend_capabilities (backend_id, capability) VALUES (?, ?)")
            .bind(backend.backend_id)
            .bind(capability.as_str())
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// All backends, enabled or not, ordered by id
pub async fn list_backends(pool: &SqlitePool) -> Result<Vec<Backend>> {
    let rows = sqlx::query_as::<_, BackendRow>(
        "SELECT backend_id, endpoint, enabled, description, default_data_groups FROM backends ORDER BY backend_id",
    )
    .fetch_all(pool)
    .await?;

    let capability_rows = sqlx::query_as::<_, CapabilityRow>(
        "SELECT backend_id, capability FROM backend_capabilities",
    )
    .fetch_all(pool)
    .await?;

    let mut capabilities: HashMap<BackendId, BTreeSet<Capability>> = HashMap::new();
    for row in capability_rows {
        match row.capability.parse::<Capability>() {
            Ok(capability) => {
                capabilities.entry(row.backend_id).or_default().insert(capability);
            }
            Err(e) => {
                tracing::warn!(backend_id = row.backend_id, error = %e, "Ignoring stored capability");
            }
        }
    }

    rows.into_iter()
        .map(|row| -> Result<Backend> {
            let default_data_groups: DataGroups = serde_json::from_str(&row.default_data_groups)?;
            Ok(Backend {
                capabilities: capabilities.remove(&row.backend_id).unwrap_or_default(),
                backend_id: row.backend_id,
                endpoint: row.endpoint,
                enabled: row.enabled,
                default_data_groups,
                description: row.description,
            })
        })
        .collect()
}

/// Single backend by id, enabled or not
pub async fn get_backend(pool: &SqlitePool, backend_id: BackendId) -> Result<Option<Backend>> {
    Ok(list_backends(pool)
        .await?
        .into_iter()
        .find(|b| b.backend_id == backend_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ca_common::model::DataGroup;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upsert_replaces_capabilities() {
        let temp_dir = TempDir::new().unwrap();
        let pool = ca_common::db::init_database(&temp_dir.path().join("ca.db"))
            .await
            .unwrap();

        let mut backend = Backend {
            backend_id: 4,
            endpoint: "http://localhost:1/".to_string(),
            enabled: true,
            capabilities: [Capability::PhotoAnalysis, Capability::PhotoSearch].into(),
            default_data_groups: DataGroups::new([DataGroup::Basic, DataGroup::Keywords]),
            description: Some("test".to_string()),
        };
        upsert_backend(&pool, &backend).await.unwrap();

        backend.capabilities = [Capability::UserFeedback].into();
        backend.enabled = false;
        upsert_backend(&pool, &backend).await.unwrap();

        let stored = get_backend(&pool, 4).await.unwrap().unwrap();
        assert_eq!(stored, backend);
        assert!(get_backend(&pool, 5).await.unwrap().is_none());
    }
}
