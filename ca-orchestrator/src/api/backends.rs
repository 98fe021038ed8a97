//! Backend registry inspection

use axum::{extract::State, routing::get, Json, Router};
use ca_common::model::Backend;
use serde::Serialize;

use crate::{ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct BackendListResponse {
    pub backends: Vec<Backend>,
}

/// GET /backends
pub async fn list_backends(State(state): State<AppState>) -> ApiResult<Json<BackendListResponse>> {
    let backends = state.registry.list().await?;
    Ok(Json(BackendListResponse { backends }))
}

pub fn backend_routes() -> Router<AppState> {
    Router::new().route("/backends", get(list_backends))
}
