//! Event subscription endpoints.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use tracing::info;

use super::{parse_json, ResultResponse};
use crate::api::error::ApiError;
use crate::api::state::ApiState;
use crate::error::AgentError;
use crate::model::Subscription;
use crate::repository::Inserted;

/// Create notification routes.
pub fn routes() -> Router<ApiState> {
    Router::new().route("/apps/watch", post(subscribe).delete(unsubscribe))
}

fn parse_subscription(body: &Bytes) -> Result<Subscription, ApiError> {
    let subscription: Subscription = parse_json(body)?;
    if subscription.event_id.trim().is_empty() {
        return Err(AgentError::InvalidParam("eventid is required".to_string()).into());
    }
    Ok(subscription)
}

/// A repeated subscription returns the stored record with 208.
async fn subscribe(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = parse_subscription(&body)?;
    match state.agent().subscribe(subscription)? {
        Inserted::Created(record) => {
            info!(event_id = %record.event_id, app_id = %record.app_id, image = %record.image_name, "Subscribed");
            Ok((StatusCode::OK, Json(record)))
        }
        Inserted::Existing(record) => Ok((StatusCode::ALREADY_REPORTED, Json(record))),
    }
}

async fn unsubscribe(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = parse_subscription(&body)?;
    state.agent().unsubscribe(&subscription.event_id)?;
    Ok(Json(ResultResponse::success()))
}
