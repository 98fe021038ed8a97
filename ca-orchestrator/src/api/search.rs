//! Similarity search endpoints

use axum::{extract::State, routing::post, Json, Router};
use ca_common::model::{Guid, MediaItem, UserId};
use serde::{Deserialize, Serialize};

use crate::services::SearchFilters;
use crate::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct SimilarByIdRequest {
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub guid: Guid,
    #[serde(default)]
    pub filters: SearchFilters,
}

#[derive(Debug, Deserialize)]
pub struct SimilarByContentRequest {
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub url: String,
    #[serde(default)]
    pub filters: SearchFilters,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub items: Vec<MediaItem>,
}

/// POST /search/similar-by-id
pub async fn similar_by_id(
    State(state): State<AppState>,
    Json(request): Json<SimilarByIdRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let items = state
        .search
        .search_by_id(request.user_id, &request.guid, &request.filters)
        .await?;
    Ok(Json(SearchResponse { items }))
}

/// POST /search/similar-by-content
pub async fn similar_by_content(
    State(state): State<AppState>,
    Json(request): Json<SimilarByContentRequest>,
) -> ApiResult<Json<SearchResponse>> {
    let items = state
        .search
        .search_by_content(request.user_id, &request.url, &request.filters)
        .await?;
    Ok(Json(SearchResponse { items }))
}

pub fn search_routes() -> Router<AppState> {
    Router::new()
        .route("/search/similar-by-id", post(similar_by_id))
        .route("/search/similar-by-content", post(similar_by_content))
}
