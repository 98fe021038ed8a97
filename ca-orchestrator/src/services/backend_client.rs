//! HTTP client for analysis backends
//!
//! Delivers task views to `{endpoint}/addTask` and queries the similarity
//! search methods. A delivery is accepted only on a 2xx answer.

use ca_common::model::{Backend, Guid, TaskDetails};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("content-analysis/", env!("CARGO_PKG_VERSION"));

/// Backend client errors
#[derive(Debug, Error)]
pub enum BackendClientError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Backend error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// What a backend answered to `addTask`
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    guid: Guid,
}

/// Outbound calls to analysis backends
#[derive(Debug, Clone)]
pub struct BackendClient {
    http_client: reqwest::Client,
}

impl BackendClient {
    pub fn new(delivery_timeout: Duration) -> Result<Self, BackendClientError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(delivery_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| BackendClientError::NetworkError(e.to_string()))?;

        Ok(Self { http_client })
    }

    /// POST a task view to the backend's `addTask` method
    pub async fn add_task(
        &self,
        backend: &Backend,
        task: &TaskDetails,
    ) -> Result<DeliveryResponse, BackendClientError> {
        let uri = backend.method_uri("addTask");

        let response = self
            .http_client
            .post(&uri)
            .json(task)
            .send()
            .await
            .map_err(|e| BackendClientError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendClientError::NetworkError(e.to_string()))?;
        if !status.is_success() {
            return Err(BackendClientError::ApiError(status.as_u16(), body));
        }

        Ok(DeliveryResponse {
            status: status.as_u16(),
            body,
        })
    }

    /// Call one of the backend's similarity methods and return the suggested GUIDs
    ///
    /// `target` is the `(name, value)` query pair identifying what to compare
    /// against (`guid` or `url`); `params` are the shared search filters.
    pub async fn search(
        &self,
        backend: &Backend,
        method: &str,
        target: (&str, &str),
        params: &[(String, String)],
    ) -> Result<Vec<Guid>, BackendClientError> {
        let uri = backend.method_uri(method);

        let response = self
            .http_client
            .post(&uri)
            .query(&[target])
            .query(params)
            .send()
            .await
            .map_err(|e| BackendClientError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(BackendClientError::ApiError(status.as_u16(), error_text));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| BackendClientError::ParseError(e.to_string()))?;

        Ok(parsed.items.into_iter().map(|hit| hit.guid).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        assert!(BackendClient::new(Duration::from_secs(30)).is_ok());
    }

    #[test]
    fn test_search_response_ignores_extra_fields() {
        let parsed: SearchResponse =
            serde_json::from_str(r#"{"items":[{"guid":"a","score":0.9},{"guid":"b"}]}"#).unwrap();
        let guids: Vec<Guid> = parsed.items.into_iter().map(|h| h.guid).collect();
        assert_eq!(guids, vec!["a".to_string(), "b".to_string()]);

        let empty: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.items.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        let client = BackendClient::new(Duration::from_secs(2)).unwrap();
        let backend = Backend {
            backend_id: 1,
            endpoint: "http://127.0.0.1:1/".to_string(),
            enabled: true,
            capabilities: Default::default(),
            default_data_groups: Default::default(),
            description: None,
        };

        let result = client
            .search(&backend, "similarById", ("guid", "g1"), &[])
            .await;
        assert!(matches!(result, Err(BackendClientError::NetworkError(_))));
    }
}
