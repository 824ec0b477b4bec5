//! Persistent records and pipeline events.
//!
//! These are the tagged shapes stored in the `service`, `event` and
//! `configuration` buckets, plus the ephemeral [`Event`] flowing from the
//! container engine to the anchor.

use chrono::{DateTime, Utc};
use pharos_id::AppId;
use serde::{Deserialize, Serialize};

// =============================================================================
// App
// =============================================================================

/// Persisted application state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AppState {
    /// Containers are up.
    Running,
    /// Containers are stopped.
    Exited,
    /// An update is in flight.
    Updating,
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppState::Running => write!(f, "RUNNING"),
            AppState::Exited => write!(f, "EXITED"),
            AppState::Updating => write!(f, "UPDATING"),
        }
    }
}

/// Registry change recorded against an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Update,
    Delete,
}

/// Overlay action applied by `UpdateAppEvent`.
///
/// `None` clears the overlay; it is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Update,
    Delete,
    None,
}

impl ChangeAction {
    /// Maps a registry webhook action (`push`, `delete`).
    pub fn from_registry_action(action: &str) -> Option<Self> {
        match action {
            "push" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Most recent registry event for an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageChange {
    pub tag: String,
    pub status: ChangeStatus,
}

/// Image referenced by an app, tag stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppImage {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<ImageChange>,
}

/// Application record in the `service` bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    /// Canonical JSON form of the compose descriptor.
    pub description: serde_json::Value,
    pub state: AppState,
    #[serde(default)]
    pub images: Vec<AppImage>,
}

/// `{id, state}` pair returned by the app listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSummary {
    pub id: AppId,
    pub state: AppState,
}

impl From<&App> for AppSummary {
    fn from(app: &App) -> Self {
        Self {
            id: app.id.clone(),
            state: app.state,
        }
    }
}

/// Container state reported per service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    pub status: String,
    pub exitcode: String,
}

/// Per-service runtime view of an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub cid: String,
    pub ports: Vec<String>,
    pub state: ServiceState,
}

/// App record enriched with live per-service state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDetail {
    #[serde(flatten)]
    pub app: App,
    pub services: Vec<ServiceInfo>,
}

// =============================================================================
// Subscription
// =============================================================================

/// Event subscription in the `event` bucket.
///
/// Empty `app_id` or `image_name` match everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "eventid", alias = "eventId")]
    pub event_id: String,
    #[serde(rename = "appid", alias = "appId", default)]
    pub app_id: String,
    #[serde(rename = "imagename", alias = "imageName", default)]
    pub image_name: String,
}

impl Subscription {
    /// Returns true if this subscription covers the given app and image.
    pub fn matches(&self, app_id: &str, image_name: &str) -> bool {
        (self.app_id.is_empty() || self.app_id == app_id)
            && (self.image_name.is_empty() || self.image_name == image_name)
    }
}

// =============================================================================
// Property
// =============================================================================

/// Device property in the `configuration` bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: serde_json::Value,
    #[serde(rename = "readOnly", default)]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Vec<String>>,
}

impl Property {
    pub fn new(name: &str, value: impl Into<serde_json::Value>, read_only: bool) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            read_only,
            policy: None,
        }
    }

    /// Returns the value as a string, rendering non-string scalars.
    pub fn value_string(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

// =============================================================================
// Event
// =============================================================================

/// Kind of pipeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Image,
    Container,
}

pub const STATUS_PULLED: &str = "pulled";
pub const STATUS_CREATED: &str = "created";
pub const STATUS_STARTED: &str = "started";

/// Lifecycle event flowing from the engine to subscribers.
///
/// `status` is opaque: besides the well-known values, raw engine actions are
/// passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    #[serde(rename = "appId")]
    pub app_id: String,
    #[serde(rename = "serviceName")]
    pub service_name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Pre-assigned id for deploy progress events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Event {
    /// Image pulled for a service.
    pub fn image_pulled(app_id: &str, service_name: &str) -> Self {
        Self {
            kind: EventType::Image,
            app_id: app_id.to_string(),
            service_name: service_name.to_string(),
            status: STATUS_PULLED.to_string(),
            cid: None,
            timestamp: Some(Utc::now()),
            id: None,
        }
    }

    /// Container lifecycle event for a service.
    pub fn container(app_id: &str, service_name: &str, status: &str, cid: Option<String>) -> Self {
        Self {
            kind: EventType::Container,
            app_id: app_id.to_string(),
            service_name: service_name.to_string(),
            status: status.to_string(),
            cid,
            timestamp: Some(Utc::now()),
            id: None,
        }
    }

    /// Tags the event with a pre-assigned id.
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }
}
