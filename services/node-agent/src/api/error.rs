//! Error responses.
//!
//! Every failure is rendered as `{"message": "<text>"}` with the status of
//! its [`AgentError`] kind.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pharos_id::IdError;
use serde::Serialize;
use tracing::{error, warn};

use crate::error::AgentError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError(pub AgentError);

impl ApiError {
    pub fn not_found_url(path: &str) -> Self {
        Self(AgentError::NotFoundUrl(format!("unsupported url: {path}")))
    }

    pub fn method_not_allowed(path: &str) -> Self {
        Self(AgentError::InvalidMethod(format!("method not allowed on {path}")))
    }

    pub fn invalid_json(err: serde_json::Error) -> Self {
        Self(AgentError::InvalidJson(err.to_string()))
    }

    pub fn status(&self) -> StatusCode {
        status_for(&self.0)
    }
}

/// HTTP status for an error kind.
pub fn status_for(err: &AgentError) -> StatusCode {
    match err {
        AgentError::InvalidYaml(_)
        | AgentError::InvalidAppId(_)
        | AgentError::InvalidParam(_)
        | AgentError::InvalidJson(_)
        | AgentError::NotFoundImage(_)
        | AgentError::AlreadyAllocatedPort(_)
        | AgentError::AlreadyUsedName(_)
        | AgentError::InvalidContainerName(_) => StatusCode::BAD_REQUEST,
        AgentError::InvalidMethod(_) => StatusCode::METHOD_NOT_ALLOWED,
        AgentError::NotFoundUrl(_) => StatusCode::NOT_FOUND,
        AgentError::NotFound(_) | AgentError::ConnectionError(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        AgentError::AlreadyReported(_) => StatusCode::ALREADY_REPORTED,
        AgentError::Io(_) | AgentError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        Self(err)
    }
}

impl From<IdError> for ApiError {
    fn from(err: IdError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.0.kind(), error = %self.0, "Request failed");
        } else {
            warn!(kind = self.0.kind(), status = status.as_u16(), error = %self.0, "Request rejected");
        }

        let body = ErrorBody {
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
