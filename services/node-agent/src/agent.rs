//! The agent: owner of every long-lived component.
//!
//! Construction wires collaborators explicitly. The dispatcher reads the
//! repositories, the controller drives the engine through the monitor, and
//! neither owns the other.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::anchor::AnchorClient;
use crate::controller::{ComposeFiles, DeploymentController};
use crate::device::{DeviceAction, SystemContainerClient};
use crate::engine::ComposeDriver;
use crate::error::AgentError;
use crate::health::{HealthChecker, HealthConfig};
use crate::model::{Property, Subscription};
use crate::monitor::AppEventMonitor;
use crate::notification::NotificationDispatcher;
use crate::repository::{Inserted, Repositories, PING_INTERVAL};
use crate::resources::HostResources;

/// Collaborators needed to build an [`Agent`].
pub struct AgentParts {
    pub repos: Repositories,
    pub driver: Arc<dyn ComposeDriver>,
    pub anchor: AnchorClient,
    pub device: SystemContainerClient,
    /// Root of the per-app compose files.
    pub compose_dir: PathBuf,
    /// Directory whose filesystem is reported as host disk.
    pub data_dir: PathBuf,
    pub health: HealthConfig,
}

/// Edge node agent.
pub struct Agent {
    pub repos: Repositories,
    pub controller: Arc<DeploymentController>,
    pub monitor: Arc<AppEventMonitor>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub health: Arc<HealthChecker>,
    device: SystemContainerClient,
    data_dir: PathBuf,
}

impl Agent {
    pub fn new(parts: AgentParts) -> Self {
        let repos = parts.repos;
        let monitor = Arc::new(AppEventMonitor::new(parts.driver.clone()));

        let controller = Arc::new(DeploymentController::new(
            repos.services.clone(),
            parts.driver,
            monitor.clone(),
            ComposeFiles::new(parts.compose_dir),
        ));

        let dispatcher = Arc::new(NotificationDispatcher::new(
            repos.services.clone(),
            repos.events.clone(),
            repos.config.clone(),
            parts.anchor.clone(),
        ));

        let health = Arc::new(HealthChecker::new(
            repos.config.clone(),
            parts.anchor,
            parts.health,
        ));

        Self {
            repos,
            controller,
            monitor,
            dispatcher,
            health,
            device: parts.device,
            data_dir: parts.data_dir,
        }
    }

    /// Start the event consumer.
    pub fn spawn_monitor(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let monitor = self.monitor.clone();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            monitor.run(dispatcher, shutdown).await;
        })
    }

    /// Recover apps, then register with the anchor.
    ///
    /// Registration failures are logged; the agent keeps serving.
    pub async fn start(&self) -> Result<(), AgentError> {
        self.controller.recover().await?;

        match self.health.register().await {
            Ok(node_id) => info!(node_id = %node_id, "Node registered"),
            Err(e) => warn!(error = %e, kind = e.kind(), "Registration failed"),
        }
        Ok(())
    }

    /// Stop the ping ticker and close every event stream.
    pub async fn shutdown(&self) {
        self.health.stop_health_check().await;
        self.monitor.disable_all().await;
        info!("Agent stopped");
    }

    pub fn properties(&self) -> Result<Vec<Property>, AgentError> {
        self.repos.config.get_properties()
    }

    /// Apply property updates given as `{name: value}` maps (or
    /// `{"name": .., "value": ..}` pairs).
    ///
    /// Every entry is validated before any is written, so a rejected request
    /// leaves the store untouched. A changed ping interval restarts the ticker.
    pub async fn set_properties(&self, updates: Vec<Map<String, Value>>) -> Result<(), AgentError> {
        let mut entries = Vec::new();
        for update in updates {
            entries.extend(property_entries(update)?);
        }

        for (name, value) in &entries {
            if name == PING_INTERVAL && !is_valid_interval(value) {
                return Err(AgentError::InvalidParam(format!(
                    "invalid {PING_INTERVAL}: {value}"
                )));
            }
            self.repos.config.check_writable(name)?;
        }

        let interval_changed = entries.iter().any(|(name, _)| name == PING_INTERVAL);
        for (name, value) in entries {
            self.repos.config.update_property(&name, value)?;
        }

        if interval_changed {
            self.health.restart().await?;
        }
        Ok(())
    }

    pub async fn unregister(&self) -> Result<(), AgentError> {
        self.health.unregister().await
    }

    pub fn subscribe(&self, subscription: Subscription) -> Result<Inserted<Subscription>, AgentError> {
        self.repos.events.subscribe(subscription)
    }

    pub fn unsubscribe(&self, event_id: &str) -> Result<(), AgentError> {
        self.repos.events.unsubscribe(event_id)
    }

    pub fn host_resources(&self) -> HostResources {
        HostResources::measure(&self.data_dir)
    }

    pub async fn device_action(&self, action: DeviceAction) -> Result<(), AgentError> {
        self.device.forward(action).await
    }
}

/// Ping interval must be a positive number of minutes.
fn is_valid_interval(value: &Value) -> bool {
    let minutes = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    matches!(minutes, Some(m) if m > 0)
}

fn property_entries(update: Map<String, Value>) -> Result<Vec<(String, Value)>, AgentError> {
    if update.len() == 2 && update.contains_key("name") && update.contains_key("value") {
        let name = update
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::InvalidParam("property name must be a string".to_string()))?
            .to_string();
        let value = update.get("value").cloned().unwrap_or(Value::Null);
        return Ok(vec![(name, value)]);
    }
    Ok(update.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_property_entries_forms() {
        let entries = property_entries(map(json!({"pinginterval": "5"}))).unwrap();
        assert_eq!(entries, vec![("pinginterval".to_string(), json!("5"))]);

        let entries = property_entries(map(json!({"name": "pinginterval", "value": 5}))).unwrap();
        assert_eq!(entries, vec![("pinginterval".to_string(), json!(5))]);

        assert!(property_entries(map(json!({"name": 1, "value": 5}))).is_err());
    }

    #[test]
    fn test_is_valid_interval() {
        assert!(is_valid_interval(&json!(5)));
        assert!(is_valid_interval(&json!("10")));
        assert!(!is_valid_interval(&json!(0)));
        assert!(!is_valid_interval(&json!("soon")));
        assert!(!is_valid_interval(&json!(true)));
    }
}
