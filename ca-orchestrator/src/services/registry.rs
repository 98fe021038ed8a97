//! Backend registry
//!
//! Read side filters to enabled backends and is consulted fresh on every
//! dispatch decision; nothing is cached.

use ca_common::model::{Backend, BackendId, Capability};
use ca_common::Result;
use sqlx::SqlitePool;

use crate::db::backends;

#[derive(Debug, Clone)]
pub struct BackendRegistry {
    db: SqlitePool,
}

impl BackendRegistry {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    async fn enabled(&self) -> Result<Vec<Backend>> {
        Ok(backends::list_backends(&self.db)
            .await?
            .into_iter()
            .filter(|b| b.enabled)
            .collect())
    }

    /// Enabled backends holding `capability`
    pub async fn backends_with_capability(&self, capability: Capability) -> Result<Vec<Backend>> {
        Ok(self
            .enabled()
            .await?
            .into_iter()
            .filter(|b| b.has_capability(capability))
            .collect())
    }

    /// Enabled backends holding every capability in `required`
    pub async fn backends_with_all_capabilities(
        &self,
        required: &[Capability],
    ) -> Result<Vec<Backend>> {
        Ok(self
            .enabled()
            .await?
            .into_iter()
            .filter(|b| b.has_all_capabilities(required))
            .collect())
    }

    /// Enabled backends holding at least one capability in `wanted`, each once
    pub async fn backends_with_any_capability(
        &self,
        wanted: &[Capability],
    ) -> Result<Vec<Backend>> {
        Ok(self
            .enabled()
            .await?
            .into_iter()
            .filter(|b| b.has_any_capability(wanted))
            .collect())
    }

    /// Enabled backend by id
    pub async fn get(&self, backend_id: BackendId) -> Result<Option<Backend>> {
        Ok(backends::get_backend(&self.db, backend_id)
            .await?
            .filter(|b| b.enabled))
    }

    /// Every registered backend, including disabled ones
    pub async fn list(&self) -> Result<Vec<Backend>> {
        backends::list_backends(&self.db).await
    }

    pub async fn upsert(&self, backend: &Backend) -> Result<()> {
        backends::upsert_backend(&self.db, backend).await
    }
}
