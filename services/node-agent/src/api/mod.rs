//! HTTP API handlers and routing.

pub mod error;
pub mod state;
mod v1;

use axum::{http::Uri, Router};
use tower_http::trace::TraceLayer;

use self::error::ApiError;
use self::state::ApiState;

/// Create the agent's REST router.
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .nest("/api/v1", v1::routes())
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found_url(uri.path())
}

async fn method_not_allowed(uri: Uri) -> ApiError {
    ApiError::method_not_allowed(uri.path())
}
