//! Container engine adapter.
//!
//! The deployment controller only sees [`ComposeDriver`]: compose-level verbs
//! applied to a compose file under a project named after the app id, plus a
//! handful of image and container lookups.
//!
//! ## Implementations
//!
//! - [`DockerCompose`]: `docker compose` CLI for project verbs, Engine API
//!   over the Unix socket for image/container queries
//! - [`MockComposeDriver`]: records every call, for tests and development

mod compose;
mod docker;
mod mock;
pub mod units;

pub use compose::{classify_event, DockerCompose, DockerComposeConfig};
pub use docker::{
    find_digest_by_name, find_id_by_repo_digest, ContainerInspect, DockerApi, ImageSummary,
};
pub use mock::{EngineCall, EngineOp, MockComposeDriver};

use std::path::Path;

use async_trait::async_trait;
use pharos_id::AppId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::model::Event;

/// Channel the engine forwards events into.
pub type EventSink = mpsc::Sender<Event>;

/// Errors from the container engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("compose {verb} failed: {stderr}")]
    Command { verb: String, stderr: String },

    #[error("engine API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("engine connection error: {0}")]
    Connection(String),

    #[error("{0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One row of `compose ps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsRecord {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "ID", alias = "Id", default)]
    pub id: String,
    #[serde(rename = "Ports", default)]
    pub ports: String,
    #[serde(rename = "State", default)]
    pub state: String,
    #[serde(rename = "Command", default)]
    pub command: String,
    #[serde(rename = "Service", default)]
    pub service: String,
}

/// Inspect summary of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub cid: String,
    pub ports: Vec<String>,
    pub status: String,
    pub exit_code: i64,
}

/// Point-in-time resource usage of a container, formatted for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu: String,
    pub mem: String,
    pub mem_limit: String,
    pub mem_percent: String,
    pub net_input: String,
    pub net_output: String,
    pub block_input: String,
    pub block_output: String,
}

/// Capability set of the container engine.
///
/// Project-level verbs take the app id (used as compose project name) and the
/// compose file path. An empty `services` slice means all services.
#[async_trait]
pub trait ComposeDriver: Send + Sync {
    async fn create(&self, app_id: &AppId, file: &Path) -> Result<(), EngineError>;

    /// `force_recreate` recreates containers even if their config is unchanged.
    async fn up(
        &self,
        app_id: &AppId,
        file: &Path,
        force_recreate: bool,
        services: &[String],
    ) -> Result<(), EngineError>;

    async fn down(&self, app_id: &AppId, file: &Path) -> Result<(), EngineError>;

    /// `down` plus removal of every image referenced by the compose file.
    async fn down_with_remove_images(&self, app_id: &AppId, file: &Path) -> Result<(), EngineError>;

    async fn start(&self, app_id: &AppId, file: &Path) -> Result<(), EngineError>;

    async fn stop(&self, app_id: &AppId, file: &Path) -> Result<(), EngineError>;

    async fn pause(&self, app_id: &AppId, file: &Path) -> Result<(), EngineError>;

    async fn unpause(&self, app_id: &AppId, file: &Path) -> Result<(), EngineError>;

    async fn pull(&self, app_id: &AppId, file: &Path, services: &[String]) -> Result<(), EngineError>;

    async fn ps(
        &self,
        app_id: &AppId,
        file: &Path,
        services: &[String],
    ) -> Result<Vec<PsRecord>, EngineError>;

    /// `pull` then `up(force_recreate = true)`, forwarding progress events
    /// tagged with `event_id` to `sink`.
    ///
    /// The forwarding task has exited when this returns.
    async fn up_with_event(
        &self,
        app_id: &AppId,
        file: &Path,
        event_id: &str,
        sink: EventSink,
        services: &[String],
    ) -> Result<(), EngineError>;

    /// Subscribe (`Some`) or unsubscribe (`None`) the app's container events.
    ///
    /// Unsubscribing an app that is not subscribed is a no-op.
    async fn events(
        &self,
        app_id: &AppId,
        file: &Path,
        sink: Option<EventSink>,
    ) -> Result<(), EngineError>;

    async fn image_pull(&self, reference: &str) -> Result<(), EngineError>;

    async fn image_tag(&self, image_id: &str, reference: &str) -> Result<(), EngineError>;

    /// First repo digest of an image tagged `name`.
    async fn get_image_digest_by_name(&self, name: &str) -> Result<String, EngineError>;

    /// Id of the untagged image carrying `digest`.
    async fn get_image_id_by_repo_digest(&self, digest: &str) -> Result<String, EngineError>;

    async fn get_container_config_by_name(&self, name: &str)
        -> Result<ContainerConfig, EngineError>;

    async fn container_stats(&self, name: &str) -> Result<ContainerStats, EngineError>;
}
