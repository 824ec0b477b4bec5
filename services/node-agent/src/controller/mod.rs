//! Deployment controller.
//!
//! The only writer of [`AppState`]. Every mutating operation on an app runs
//! under that app's lock (owned by the [`AppEventMonitor`]) and leaves the
//! persisted state consistent with what the engine reports.
//!
//! ## Operations
//!
//! - Install: deploy, descriptor update
//! - Lifecycle: start, stop, delete, startup recovery
//! - Update: image update with rollback, registry webhook overlays

mod files;
mod lifecycle;
mod update;

pub use files::ComposeFiles;
pub use update::{RegistryEvent, RegistryNotification, RegistryRequest, RegistryTarget, UpdateQuery};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pharos_id::AppId;
use serde::Deserialize;
use tracing::{info, warn};

use crate::descriptor;
use crate::engine::{ComposeDriver, PsRecord};
use crate::error::AgentError;
use crate::model::{App, AppDetail, AppState, AppSummary, ServiceInfo, ServiceState};
use crate::repository::{Inserted, ServiceRepository};
use crate::monitor::AppEventMonitor;
use crate::resources::ServiceResource;

/// Optional deploy parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeployQuery {
    /// Tag deploy progress events with this id.
    #[serde(default)]
    pub eventid: Option<String>,
}

/// Controller over apps on this node.
pub struct DeploymentController {
    services: Arc<ServiceRepository>,
    driver: Arc<dyn ComposeDriver>,
    monitor: Arc<AppEventMonitor>,
    files: ComposeFiles,
}

impl DeploymentController {
    pub fn new(
        services: Arc<ServiceRepository>,
        driver: Arc<dyn ComposeDriver>,
        monitor: Arc<AppEventMonitor>,
        files: ComposeFiles,
    ) -> Self {
        Self {
            services,
            driver,
            monitor,
            files,
        }
    }

    /// Load an app; a missing record is an invalid app id.
    fn load(&self, app_id: &AppId) -> Result<App, AgentError> {
        self.services.get_app(app_id).map_err(|e| match e {
            AgentError::NotFound(_) => AgentError::InvalidAppId(format!("unknown app id {app_id}")),
            other => other,
        })
    }

    /// Write the app's compose file from its stored descriptor.
    async fn prepare(&self, app: &App) -> Result<PathBuf, AgentError> {
        self.files.write(&app.id, &app.description).await
    }

    /// Install and start an app.
    ///
    /// Deploying a descriptor whose id already exists returns the stored app
    /// without touching the engine.
    pub async fn deploy_app(&self, yaml: &str, query: DeployQuery) -> Result<AppDetail, AgentError> {
        let description = descriptor::yaml_to_json(yaml)?;

        let app = match self.services.insert_compose_file(&description)? {
            Inserted::Existing(app) => {
                info!(app_id = %app.id, "App already deployed");
                return Ok(self.enrich(app).await);
            }
            Inserted::Created(app) => app,
        };

        let _guard = self.monitor.lock_app(&app.id).await;
        info!(app_id = %app.id, services = app.images.len(), "Deploying app");

        let file = match self.enable_events(&app).await {
            Ok(file) => file,
            Err(e) => {
                warn!(app_id = %app.id, error = %e, "Deploy failed before engine up, rolling back");
                self.rollback_install(&app, false).await;
                return Err(e);
            }
        };

        if let Err(e) = self.bring_up(&app, &file, &query).await {
            warn!(app_id = %app.id, error = %e, "Deploy failed, rolling back");
            self.rollback_install(&app, true).await;
            return Err(e);
        }

        info!(app_id = %app.id, "App deployed");
        let app = self.load(&app.id)?;
        Ok(self.enrich(app).await)
    }

    async fn enable_events(&self, app: &App) -> Result<PathBuf, AgentError> {
        let file = self.prepare(app).await?;
        self.monitor.enable(&app.id, &file).await?;
        Ok(file)
    }

    async fn bring_up(&self, app: &App, file: &Path, query: &DeployQuery) -> Result<(), AgentError> {
        match query.eventid.as_deref().filter(|id| !id.is_empty()) {
            Some(event_id) => {
                self.driver
                    .up_with_event(&app.id, file, event_id, self.monitor.sender(), &[])
                    .await?
            }
            None => self.driver.up(&app.id, file, true, &[]).await?,
        }
        Ok(())
    }

    /// Undo a failed deploy. Images are only removed once the engine has
    /// been asked to bring the app up.
    async fn rollback_install(&self, app: &App, engine_touched: bool) {
        if engine_touched {
            let file = self.files.path(&app.id);
            if let Err(e) = self.driver.down_with_remove_images(&app.id, &file).await {
                warn!(app_id = %app.id, error = %e, "Rollback: compose down failed");
            }
        }
        if let Err(e) = self.monitor.disable(&app.id).await {
            warn!(app_id = %app.id, error = %e, "Rollback: disabling events failed");
        }
        if let Err(e) = self.services.delete_app(&app.id) {
            warn!(app_id = %app.id, error = %e, "Rollback: deleting record failed");
        }
        self.files.remove(&app.id).await;
    }

    /// Get an app with live per-service state.
    pub async fn get_app(&self, app_id: &AppId) -> Result<AppDetail, AgentError> {
        let app = self.load(app_id)?;
        Ok(self.enrich(app).await)
    }

    /// `{id, state}` of every app.
    pub fn list_apps(&self) -> Result<Vec<AppSummary>, AgentError> {
        Ok(self.services.get_apps()?.iter().map(AppSummary::from).collect())
    }

    /// Replace an app's descriptor. The new descriptor must hash to the same id.
    pub async fn update_app_info(&self, app_id: &AppId, yaml: &str) -> Result<(), AgentError> {
        let description = descriptor::yaml_to_json(yaml)?;
        let computed = descriptor::app_id(&description)?;
        if &computed != app_id {
            return Err(AgentError::InvalidYaml(format!(
                "descriptor belongs to app {computed}, not {app_id}"
            )));
        }

        let _guard = self.monitor.lock_app(app_id).await;
        self.load(app_id)?;
        self.services.update_app_info(app_id, &description)?;
        info!(app_id = %app_id, "App description updated");
        Ok(())
    }

    /// Per-service container state. Engine failures yield an empty list.
    async fn enrich(&self, app: App) -> AppDetail {
        let services = match self.service_infos(&app).await {
            Ok(services) => services,
            Err(e) => {
                warn!(app_id = %app.id, error = %e, "Failed to read service state");
                Vec::new()
            }
        };
        AppDetail { app, services }
    }

    /// Runs without the app lock; never rewrites an existing compose file.
    async fn ps(&self, app: &App) -> Result<Vec<PsRecord>, AgentError> {
        let file = self.files.ensure(&app.id, &app.description).await?;
        Ok(self.driver.ps(&app.id, &file, &[]).await?)
    }

    async fn service_infos(&self, app: &App) -> Result<Vec<ServiceInfo>, AgentError> {
        let mut services = Vec::new();

        for record in self.ps(app).await? {
            let name = if record.service.is_empty() {
                record.name.clone()
            } else {
                record.service.clone()
            };

            let info = match self.driver.get_container_config_by_name(&record.name).await {
                Ok(config) => ServiceInfo {
                    name,
                    cid: config.cid,
                    ports: config.ports,
                    state: ServiceState {
                        status: config.status,
                        exitcode: config.exit_code.to_string(),
                    },
                },
                Err(e) => {
                    warn!(container = %record.name, error = %e, "Inspect failed, using ps output");
                    ServiceInfo {
                        name,
                        cid: record.id,
                        ports: split_ports(&record.ports),
                        state: ServiceState {
                            status: record.state,
                            exitcode: String::new(),
                        },
                    }
                }
            };
            services.push(info);
        }

        Ok(services)
    }

    /// Point-in-time resource usage of each of the app's containers.
    pub async fn app_resources(&self, app_id: &AppId) -> Result<Vec<ServiceResource>, AgentError> {
        let app = self.load(app_id)?;
        let mut resources = Vec::new();

        for record in self.ps(&app).await? {
            if record.state != "running" {
                continue;
            }
            let stats = self.driver.container_stats(&record.name).await?;
            let name = if record.service.is_empty() {
                record.name
            } else {
                record.service
            };
            resources.push(ServiceResource { name, stats });
        }

        Ok(resources)
    }

    /// Persisted state of an app.
    pub fn app_state(&self, app_id: &AppId) -> Result<AppState, AgentError> {
        Ok(self.load(app_id)?.state)
    }
}

fn split_ports(ports: &str) -> Vec<String> {
    ports
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ports() {
        assert_eq!(
            split_ports("0.0.0.0:80->80/tcp, :::80->80/tcp"),
            vec!["0.0.0.0:80->80/tcp", ":::80->80/tcp"]
        );
        assert!(split_ports("").is_empty());
    }
}
