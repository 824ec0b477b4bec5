//! App management endpoints.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use super::{parse_app_id, parse_json, parse_optional_json, ResultResponse};
use crate::api::error::ApiError;
use crate::api::state::ApiState;
use crate::controller::{DeployQuery, RegistryNotification, UpdateQuery};
use crate::model::AppSummary;

/// Create app routes.
///
/// Mounted under `/api/v1/management`.
pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/apps/deploy", post(deploy_app))
        .route("/apps", get(list_apps))
        .route(
            "/apps/{app_id}",
            get(get_app).post(update_app_info).delete(delete_app),
        )
        .route("/apps/{app_id}/start", post(start_app))
        .route("/apps/{app_id}/stop", post(stop_app))
        .route("/apps/{app_id}/update", post(update_app))
        .route("/apps/{app_id}/events", post(handle_events))
}

#[derive(Debug, Serialize)]
pub struct AppListResponse {
    pub apps: Vec<AppSummary>,
}

async fn deploy_app(
    State(state): State<ApiState>,
    Query(query): Query<DeployQuery>,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state.controller().deploy_app(&body, query).await?;
    let location = format!("/api/v1/management/apps/{}", detail.app.id);
    Ok(([(header::LOCATION, location)], Json(detail)))
}

async fn list_apps(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let apps = state.controller().list_apps()?;
    Ok(Json(AppListResponse { apps }))
}

async fn get_app(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let app_id = parse_app_id(&app_id)?;
    let detail = state.controller().get_app(&app_id).await?;
    Ok(Json(detail))
}

async fn update_app_info(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let app_id = parse_app_id(&app_id)?;
    state.controller().update_app_info(&app_id, &body).await?;
    Ok(Json(ResultResponse::success()))
}

async fn delete_app(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let app_id = parse_app_id(&app_id)?;
    state.controller().delete_app(&app_id).await?;
    Ok(Json(ResultResponse::success()))
}

async fn start_app(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let app_id = parse_app_id(&app_id)?;
    state.controller().start_app(&app_id).await?;
    Ok(Json(ResultResponse::success()))
}

async fn stop_app(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let app_id = parse_app_id(&app_id)?;
    state.controller().stop_app(&app_id).await?;
    Ok(Json(ResultResponse::success()))
}

async fn update_app(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let app_id = parse_app_id(&app_id)?;
    let query: UpdateQuery = parse_optional_json(&body)?;
    state.controller().update_app(&app_id, query).await?;
    Ok(Json(ResultResponse::success()))
}

async fn handle_events(
    State(state): State<ApiState>,
    Path(app_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let app_id = parse_app_id(&app_id)?;
    let notification: RegistryNotification = parse_json(&body)?;
    info!(app_id = %app_id, events = notification.events.len(), "Registry notification received");
    state.controller().handle_events(&app_id, notification).await?;
    Ok(Json(ResultResponse::success()))
}
