//! API v1 routes.

mod apps;
mod device;
mod monitoring;
mod notification;

use axum::{body::Bytes, Router};
use pharos_id::AppId;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::ApiError;
use super::state::ApiState;

/// Create API v1 routes.
pub fn routes() -> Router<ApiState> {
    Router::new()
        .nest("/management", apps::routes().merge(device::routes()))
        .nest("/monitoring", monitoring::routes())
        .nest("/notification", notification::routes())
}

/// Body of operations that return no data.
#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub result: &'static str,
}

impl ResultResponse {
    pub fn success() -> Self {
        Self { result: "success" }
    }
}

fn parse_app_id(raw: &str) -> Result<AppId, ApiError> {
    Ok(AppId::parse(raw)?)
}

/// Decode a JSON body. Malformed JSON is `InvalidJSON` rather than an
/// extractor rejection, so the error body keeps the `{"message"}` shape.
fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(ApiError::invalid_json)
}

/// Like [`parse_json`], but an empty body yields the default value.
fn parse_optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_json(body)
}
