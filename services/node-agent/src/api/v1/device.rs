//! Device endpoints: properties, reboot/restore, unregister.

use axum::{
    body::Bytes,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{parse_json, ResultResponse};
use crate::api::error::ApiError;
use crate::api::state::ApiState;
use crate::device::DeviceAction;
use crate::model::Property;

/// Create device routes.
///
/// Mounted under `/api/v1/management`.
pub fn routes() -> Router<ApiState> {
    Router::new()
        .route(
            "/device/configuration",
            get(get_configuration).post(set_configuration),
        )
        .route("/device/reboot", post(reboot))
        .route("/device/restore", post(restore))
        .route("/unregister", post(unregister))
}

#[derive(Debug, Serialize)]
pub struct PropertiesResponse {
    pub properties: Vec<Property>,
}

#[derive(Debug, Deserialize)]
pub struct SetPropertiesRequest {
    pub properties: Vec<Map<String, Value>>,
}

async fn get_configuration(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let properties = state.agent().properties()?;
    Ok(Json(PropertiesResponse { properties }))
}

async fn set_configuration(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: SetPropertiesRequest = parse_json(&body)?;
    state.agent().set_properties(request.properties).await?;
    let properties = state.agent().properties()?;
    Ok(Json(PropertiesResponse { properties }))
}

async fn reboot(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    state.agent().device_action(DeviceAction::Reboot).await?;
    Ok(Json(ResultResponse::success()))
}

async fn restore(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    state.agent().device_action(DeviceAction::Restore).await?;
    Ok(Json(ResultResponse::success()))
}

async fn unregister(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    state.agent().unregister().await?;
    Ok(Json(ResultResponse::success()))
}
