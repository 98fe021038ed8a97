//! User media feedback endpoints

use axum::{extract::State, routing::post, Json, Router};
use ca_common::model::{Guid, MediaItem, TaskId, UserId};
use serde::{Deserialize, Serialize};

use crate::services::media::UpdateOutcome;
use crate::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct UpdateMediaRequest {
    pub user_id: UserId,
    pub items: Vec<MediaItem>,
}

/// POST /media/update
pub async fn update_media(
    State(state): State<AppState>,
    Json(request): Json<UpdateMediaRequest>,
) -> ApiResult<Json<UpdateOutcome>> {
    let outcome = state
        .media
        .update_media(request.user_id, request.items)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct SimilarityFeedbackRequest {
    pub user_id: UserId,
    pub reference: Vec<Guid>,
    #[serde(default)]
    pub similar: Vec<Guid>,
    #[serde(default)]
    pub dissimilar: Vec<Guid>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

/// POST /media/similarity-feedback
pub async fn similarity_feedback(
    State(state): State<AppState>,
    Json(request): Json<SimilarityFeedbackRequest>,
) -> ApiResult<Json<FeedbackResponse>> {
    let task_id = state
        .media
        .similarity_feedback(
            request.user_id,
            request.reference,
            request.similar,
            request.dissimilar,
        )
        .await?;
    Ok(Json(FeedbackResponse { task_id }))
}

#[derive(Debug, Deserialize)]
pub struct DeleteMediaRequest {
    pub user_id: UserId,
    pub guids: Vec<Guid>,
}

#[derive(Debug, Serialize)]
pub struct DeleteMediaResponse {
    pub deleted: Vec<Guid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

/// POST /media/delete
pub async fn delete_media(
    State(state): State<AppState>,
    Json(request): Json<DeleteMediaRequest>,
) -> ApiResult<Json<DeleteMediaResponse>> {
    let (deleted, task_id) = state
        .media
        .delete_media(request.user_id, request.guids)
        .await?;
    Ok(Json(DeleteMediaResponse { deleted, task_id }))
}

pub fn media_routes() -> Router<AppState> {
    Router::new()
        .route("/media/update", post(update_media))
        .route("/media/similarity-feedback", post(similarity_feedback))
        .route("/media/delete", post(delete_media))
}
