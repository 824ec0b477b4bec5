//! Resource monitoring endpoints.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use super::parse_app_id;
use crate::api::error::ApiError;
use crate::api::state::ApiState;
use crate::resources::ServiceResource;

/// Create monitoring routes.
pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/resource", get(host_resource))
        .route("/apps/{app_id}/resource", get(app_resource))
}

#[derive(Debug, Serialize)]
pub struct AppResourceResponse {
    pub services: Vec<ServiceResource>,
}

async fn host_resource(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.agent().host_resources())
}

async fn app_resource(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let app_id = parse_app_id(&app_id)?;
    let services = state.controller().app_resources(&app_id).await?;
    Ok(Json(AppResourceResponse { services }))
}
