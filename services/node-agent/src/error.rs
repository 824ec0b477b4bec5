//! Agent-wide error taxonomy.
//!
//! Every layer (store, engine, anchor) has its own error type; they all
//! collapse into [`AgentError`], whose variants are what the REST surface
//! maps to status codes.

use pharos_id::IdError;
use thiserror::Error;

use crate::engine::EngineError;
use crate::store::StoreError;

/// Engine stderr fragment emitted when an image is still referenced by
/// another repository. Tear-down treats it as success.
pub const REPOSITORY_CONFLICT: &str = "unable to remove repository reference";

/// Errors surfaced by agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    NotFoundUrl(String),

    #[error("{0}")]
    NotFoundImage(String),

    #[error("{0}")]
    InvalidJson(String),

    #[error("{0}")]
    InvalidYaml(String),

    #[error("{0}")]
    InvalidParam(String),

    #[error("{0}")]
    InvalidAppId(String),

    #[error("{0}")]
    InvalidContainerName(String),

    #[error("{0}")]
    InvalidMethod(String),

    #[error("{0}")]
    AlreadyReported(String),

    #[error("{0}")]
    AlreadyAllocatedPort(String),

    #[error("{0}")]
    AlreadyUsedName(String),

    #[error("{0}")]
    ConnectionError(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Unknown(String),
}

impl AgentError {
    /// Short, stable name of the error kind for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::NotFoundUrl(_) => "NotFoundURL",
            Self::NotFoundImage(_) => "NotFoundImage",
            Self::InvalidJson(_) => "InvalidJSON",
            Self::InvalidYaml(_) => "InvalidYaml",
            Self::InvalidParam(_) => "InvalidParam",
            Self::InvalidAppId(_) => "InvalidAppId",
            Self::InvalidContainerName(_) => "InvalidContainerName",
            Self::InvalidMethod(_) => "InvalidMethod",
            Self::AlreadyReported(_) => "AlreadyReported",
            Self::AlreadyAllocatedPort(_) => "AlreadyAllocatedPort",
            Self::AlreadyUsedName(_) => "AlreadyUsedName",
            Self::ConnectionError(_) => "ConnectionError",
            Self::Io(_) => "IOError",
            Self::Unknown(_) => "Unknown",
        }
    }

    /// Classifies container engine output by substring.
    pub fn from_engine_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if lower.contains("already allocated") {
            Self::AlreadyAllocatedPort(message)
        } else if lower.contains("already in use by container") {
            Self::AlreadyUsedName(message)
        } else if lower.contains("invalid container name") {
            Self::InvalidContainerName(message)
        } else if lower.contains("no such image")
            || lower.contains("manifest unknown")
            || lower.contains("pull access denied")
            || (lower.contains("manifest for") && lower.contains("not found"))
        {
            Self::NotFoundImage(message)
        } else if lower.contains("cannot connect to the docker daemon")
            || lower.contains("connection refused")
        {
            Self::ConnectionError(message)
        } else {
            Self::Unknown(message)
        }
    }

    /// Returns true if the message matches the repository-reference conflict
    /// raised when removing shared images.
    pub fn is_repository_conflict(&self) -> bool {
        self.to_string().contains(REPOSITORY_CONFLICT)
    }
}

impl From<StoreError> for AgentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => Self::NotFound(format!("not found: {key}")),
            StoreError::Json(e) => Self::InvalidJson(e.to_string()),
            StoreError::Sqlite(e) => Self::Unknown(e.to_string()),
        }
    }
}

impl From<EngineError> for AgentError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Io(e) => Self::Io(e.to_string()),
            EngineError::Connection(message) => Self::ConnectionError(message),
            EngineError::NotFound(message) => Self::NotFound(message),
            EngineError::Json(e) => Self::InvalidJson(e.to_string()),
            other => Self::from_engine_message(other.to_string()),
        }
    }
}

impl From<IdError> for AgentError {
    fn from(err: IdError) -> Self {
        if err.is_descriptor_error() {
            Self::InvalidYaml(err.to_string())
        } else {
            Self::InvalidAppId(err.to_string())
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidJson(err.to_string())
    }
}

impl From<serde_yaml::Error> for AgentError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::InvalidYaml(err.to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::ConnectionError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Bind for 0.0.0.0:80 failed: port is already allocated", "AlreadyAllocatedPort")]
    #[case(
        "Conflict. The container name \"/web\" is already in use by container \"abc\"",
        "AlreadyUsedName"
    )]
    #[case("Error: No such image: repo/img:1.0", "NotFoundImage")]
    #[case("manifest for repo/img:9 not found: manifest unknown", "NotFoundImage")]
    #[case("Invalid container name (x/y), only [a-zA-Z0-9] allowed", "InvalidContainerName")]
    #[case(
        "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
        "ConnectionError"
    )]
    #[case("something unexpected", "Unknown")]
    fn test_classify_engine_message(#[case] message: &str, #[case] kind: &str) {
        assert_eq!(AgentError::from_engine_message(message).kind(), kind);
    }

    #[test]
    fn test_repository_conflict() {
        let err = AgentError::from_engine_message(
            "conflict: unable to remove repository reference \"repo/img\" (must force)",
        );
        assert!(err.is_repository_conflict());
        assert!(!AgentError::Unknown("boom".to_string()).is_repository_conflict());
    }

    #[test]
    fn test_store_error_mapping() {
        let err: AgentError = StoreError::NotFound("abc".to_string()).into();
        assert_eq!(err.kind(), "NotFound");
    }

    #[test]
    fn test_id_error_mapping() {
        let err: AgentError = IdError::NoServices.into();
        assert_eq!(err.kind(), "InvalidYaml");
        let err: AgentError = IdError::Empty.into();
        assert_eq!(err.kind(), "InvalidAppId");
    }
}
