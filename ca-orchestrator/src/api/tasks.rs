//! Task endpoints
//!
//! Users submit analysis work and inspect tasks; backends fetch task views
//! and report completion.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use ca_common::model::{
    BackendId, BackendStatusList, Guid, MediaItem, ServiceType, TaskDetails, TaskId,
    TaskParameters, TaskStatus, UserId, Visibility,
};
use ca_common::Error;
use serde::{Deserialize, Serialize};

use crate::db::{backends, tasks};
use crate::services::ingestor::{IngestOutcome, TaskResultReport};
use crate::services::task_view::load_task_view;
use crate::{ApiError, ApiResult, AppState};

/// One item of an analysis submission
#[derive(Debug, Deserialize)]
pub struct SubmittedItem {
    #[serde(default)]
    pub guid: Option<Guid>,
    pub service_type: ServiceType,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisRequest {
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub items: Vec<SubmittedItem>,
    #[serde(default)]
    pub analysis_types: Vec<ca_common::model::AnalysisType>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub task_id: TaskId,
    pub guids: Vec<Guid>,
}

/// POST /tasks/analysis
pub async fn submit_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> ApiResult<Json<AnalysisResponse>> {
    let items = request
        .items
        .into_iter()
        .map(|submitted| MediaItem {
            service_type: Some(submitted.service_type),
            visibility: Some(submitted.visibility),
            url: submitted.url,
            ..MediaItem::new(submitted.guid.unwrap_or_default())
        })
        .collect();
    let parameters = (!request.analysis_types.is_empty()).then(|| TaskParameters {
        analysis_types: request.analysis_types,
    });

    let (task_id, guids) = state
        .media
        .submit_analysis(request.user_id, items, parameters)
        .await?;

    Ok(Json(AnalysisResponse { task_id, guids }))
}

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task: tasks::TaskHeader,
    pub backends: BackendStatusList,
    /// Combined status over all backends, absent when the task has none
    pub status: Option<TaskStatus>,
}

/// GET /tasks/:task_id
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> ApiResult<Json<TaskStatusResponse>> {
    let task = tasks::get_task_header(&state.db, task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("task {}", task_id)))?;
    let backends = tasks::get_backend_statuses(&state.db, task_id, None).await?;
    let status = backends.combined();

    Ok(Json(TaskStatusResponse {
        task,
        backends,
        status,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TaskDetailsQuery {
    pub task_id: TaskId,
    pub backend_id: BackendId,
}

/// GET /queryTaskDetails?task_id=&backend_id=
///
/// The view a backend receives through `addTask`, for backends that fetch
/// details later.
pub async fn query_task_details(
    State(state): State<AppState>,
    Query(query): Query<TaskDetailsQuery>,
) -> ApiResult<Json<TaskDetails>> {
    if tasks::get_backend_status(&state.db, query.task_id, query.backend_id)
        .await?
        .is_none()
    {
        return Err(Error::UnexpectedBackend {
            task_id: query.task_id,
            backend_id: query.backend_id,
        }
        .into());
    }
    let backend = backends::get_backend(&state.db, query.backend_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("backend {}", query.backend_id)))?;

    let callback_uri = format!("{}/taskFinished", state.config.callback_base_url());
    let view = load_task_view(&state.db, query.task_id, &backend, &callback_uri).await?;
    Ok(Json(view))
}

/// POST /taskFinished
pub async fn task_finished(
    State(state): State<AppState>,
    Json(report): Json<TaskResultReport>,
) -> ApiResult<Json<IngestOutcome>> {
    match state.ingestor.ingest(report).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            let err = ApiError::from(e);
            if err.is_server_error() {
                state.record_error(err.to_string()).await;
            }
            Err(err)
        }
    }
}

pub fn task_routes() -> Router<AppState> {
    Router::new()
        .route("/tasks/analysis", post(submit_analysis))
        .route("/tasks/:task_id", get(get_task))
        .route("/queryTaskDetails", get(query_task_details))
        .route("/taskFinished", post(task_finished))
}
