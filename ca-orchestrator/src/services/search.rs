//! Similarity search across backends
//!
//! A query is sent to every PHOTO_SEARCH backend at once. Backends only
//! suggest GUIDs; the merged suggestions are re-resolved against the media
//! store with the caller's permissions before anything is returned. Calls
//! that fail or time out are dropped, so a search succeeds with whatever
//! subset of backends answered.

use ca_common::model::{AnalysisType, Capability, Guid, MediaItem, ServiceType, UserId};
use ca_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::db::media::{self, AccessFilter};
use crate::services::backend_client::BackendClient;
use crate::services::registry::BackendRegistry;

const METHOD_SIMILAR_BY_ID: &str = "similarById";
const METHOD_SIMILAR_BY_CONTENT: &str = "similarByContent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub start: u32,
    pub end: u32,
}

/// Restrictions applied to search results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub service_types: Vec<ServiceType>,
    #[serde(default)]
    pub user_ids: Vec<UserId>,
    #[serde(default)]
    pub limits: Option<Limits>,
    #[serde(default)]
    pub analysis_types: Vec<AnalysisType>,
}

impl SearchFilters {
    fn access_filter(&self) -> AccessFilter {
        AccessFilter {
            service_types: self.service_types.clone(),
            user_ids: self.user_ids.clone(),
        }
    }

    /// Query parameters shared by every backend call of one search
    pub fn to_params(&self) -> Vec<(String, String)> {
        fn joined<T: ToString>(values: impl Iterator<Item = T>) -> String {
            values.map(|v| v.to_string()).collect::<Vec<_>>().join(",")
        }

        let mut params = Vec::new();
        if !self.user_ids.is_empty() {
            params.push(("user_id".to_string(), joined(self.user_ids.iter())));
        }
        if !self.service_types.is_empty() {
            params.push((
                "service_id".to_string(),
                joined(self.service_types.iter().map(|s| s.code())),
            ));
        }
        if let Some(limits) = self.limits {
            params.push(("limits".to_string(), format!("{}-{}", limits.start, limits.end)));
        }
        if !self.analysis_types.is_empty() {
            params.push((
                "analysis_type".to_string(),
                joined(self.analysis_types.iter().map(|a| a.as_str())),
            ));
        }
        params
    }
}

#[derive(Debug, Clone)]
enum SearchTarget {
    Guid(Guid),
    Url(String),
}

impl SearchTarget {
    fn method(&self) -> &'static str {
        match self {
            SearchTarget::Guid(_) => METHOD_SIMILAR_BY_ID,
            SearchTarget::Url(_) => METHOD_SIMILAR_BY_CONTENT,
        }
    }

    fn query(&self) -> (&'static str, String) {
        match self {
            SearchTarget::Guid(guid) => ("guid", guid.clone()),
            SearchTarget::Url(url) => ("url", url.clone()),
        }
    }

    fn excluded_guid(&self) -> Option<&str> {
        match self {
            SearchTarget::Guid(guid) => Some(guid.as_str()),
            SearchTarget::Url(_) => None,
        }
    }
}

/// Union of per-backend suggestions in dispatch order, without duplicates or `exclude`
pub fn merge_results(results: Vec<Vec<Guid>>, exclude: Option<&str>) -> Vec<Guid> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .flatten()
        .filter(|guid| exclude != Some(guid.as_str()))
        .filter(|guid| seen.insert(guid.clone()))
        .collect()
}

pub struct SearchFanout {
    db: SqlitePool,
    registry: BackendRegistry,
    client: BackendClient,
    timeout: Duration,
}

impl SearchFanout {
    pub fn new(
        db: SqlitePool,
        registry: BackendRegistry,
        client: BackendClient,
        timeout: Duration,
    ) -> Self {
        Self {
            db,
            registry,
            client,
            timeout,
        }
    }

    /// Items similar to a stored item the caller can see
    pub async fn search_by_id(
        &self,
        user: Option<UserId>,
        guid: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<MediaItem>> {
        let reference =
            media::search_accessible(&self.db, user, &[guid.to_string()], &AccessFilter::default())
                .await?;
        if reference.is_empty() {
            return Err(Error::NotFound(format!("media {}", guid)));
        }
        self.search(user, SearchTarget::Guid(guid.to_string()), filters)
            .await
    }

    /// Items similar to the content at `url`
    pub async fn search_by_content(
        &self,
        user: Option<UserId>,
        url: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<MediaItem>> {
        if url.trim().is_empty() {
            return Err(Error::InvalidInput("url is required".to_string()));
        }
        self.search(user, SearchTarget::Url(url.to_string()), filters)
            .await
    }

    async fn search(
        &self,
        user: Option<UserId>,
        target: SearchTarget,
        filters: &SearchFilters,
    ) -> Result<Vec<MediaItem>> {
        let backends = self
            .registry
            .backends_with_capability(Capability::PhotoSearch)
            .await?;
        if backends.is_empty() {
            tracing::debug!("No search backends available");
            return Ok(Vec::new());
        }

        let params = Arc::new(filters.to_params());
        let (name, value) = target.query();
        let mut calls = JoinSet::new();
        for (index, backend) in backends.into_iter().enumerate() {
            let client = self.client.clone();
            let params = Arc::clone(&params);
            let value = value.clone();
            let timeout = self.timeout;
            let method = target.method();
            calls.spawn(async move {
                let backend_id = backend.backend_id;
                let result = tokio::time::timeout(
                    timeout,
                    client.search(&backend, method, (name, value.as_str()), &params),
                )
                .await;
                (index, backend_id, result)
            });
        }

        let dispatched = calls.len();
        let mut answers: Vec<(usize, Vec<Guid>)> = Vec::with_capacity(dispatched);
        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((index, _, Ok(Ok(guids)))) => answers.push((index, guids)),
                Ok((_, backend_id, Ok(Err(e)))) => {
                    tracing::debug!(backend_id, error = %e, "Search call failed");
                }
                Ok((_, backend_id, Err(_))) => {
                    tracing::debug!(backend_id, "Search call timed out");
                }
                Err(e) => tracing::debug!(error = %e, "Search call aborted"),
            }
        }
        answers.sort_by_key(|(index, _)| *index);

        let merged = merge_results(
            answers.into_iter().map(|(_, guids)| guids).collect(),
            target.excluded_guid(),
        );
        tracing::debug!(
            backends = dispatched,
            suggestions = merged.len(),
            "Search suggestions merged"
        );

        let mut visible: HashMap<Guid, MediaItem> =
            media::search_accessible(&self.db, user, &merged, &filters.access_filter())
                .await?
                .into_iter()
                .map(|item| (item.guid.clone(), item))
                .collect();

        let mut ordered = Vec::with_capacity(visible.len());
        for guid in merged {
            match visible.remove(&guid) {
                Some(item) => ordered.push(item),
                None => tracing::debug!(guid = %guid, "Ignored suggestion not visible to caller"),
            }
        }

        if let Some(limits) = filters.limits {
            let start = limits.start as usize;
            let end = (limits.end as usize).saturating_add(1);
            ordered = ordered
                .into_iter()
                .skip(start)
                .take(end.saturating_sub(start))
                .collect();
        }

        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guids(values: &[&str]) -> Vec<Guid> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_merge_keeps_first_seen_order() {
        let merged = merge_results(vec![guids(&["x", "y"]), guids(&["y", "z"])], None);
        assert_eq!(merged, guids(&["x", "y", "z"]));
    }

    #[test]
    fn test_merge_excludes_target() {
        let merged = merge_results(vec![guids(&["x", "y"]), guids(&["y", "z"])], Some("y"));
        assert_eq!(merged, guids(&["x", "z"]));
    }

    #[test]
    fn test_merge_of_nothing_is_empty() {
        assert!(merge_results(vec![], Some("y")).is_empty());
        assert!(merge_results(vec![vec![], vec![]], None).is_empty());
    }

    #[test]
    fn test_params_encode_filters() {
        let filters = SearchFilters {
            service_types: vec![ServiceType::Picasa, ServiceType::UrlStorage],
            user_ids: vec![3, 4],
            limits: Some(Limits { start: 0, end: 9 }),
            analysis_types: vec![AnalysisType::KeywordExtraction],
        };
        let params = filters.to_params();

        assert_eq!(
            params,
            vec![
                ("user_id".to_string(), "3,4".to_string()),
                ("service_id".to_string(), "1,7".to_string()),
                ("limits".to_string(), "0-9".to_string()),
                ("analysis_type".to_string(), "keyword_extraction".to_string()),
            ]
        );
        assert!(SearchFilters::default().to_params().is_empty());
    }
}
