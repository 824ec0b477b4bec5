//! Image updates and registry webhook handling.
//!
//! An update records the repo digest of every image it is about to replace.
//! If pulling or bringing up the new images fails, each digest is pulled
//! again and re-tagged with its original reference before the app is brought
//! back up on the original descriptor.

use std::path::PathBuf;

use pharos_id::{split_repo_tag, AppId};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::DeploymentController;
use crate::descriptor;
use crate::error::AgentError;
use crate::model::{App, AppState, ChangeAction};

/// Optional update parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateQuery {
    /// New image references; each replaces the service image with the same
    /// repository. Empty means re-pull every service.
    #[serde(default)]
    pub images: Vec<String>,
    /// Tag update progress events with this id.
    #[serde(default)]
    pub eventid: Option<String>,
}

/// Registry webhook envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryNotification {
    #[serde(default)]
    pub events: Vec<RegistryEvent>,
}

/// One registry event.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryEvent {
    pub action: String,
    #[serde(default)]
    pub target: RegistryTarget,
    #[serde(default)]
    pub request: RegistryRequest,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryTarget {
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub tag: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryRequest {
    #[serde(default)]
    pub host: String,
}

impl RegistryEvent {
    /// Image name as it appears in descriptors: `host/repository` when the
    /// registry host is known.
    pub fn image_name(&self) -> String {
        if self.request.host.is_empty() {
            self.target.repository.clone()
        } else {
            format!("{}/{}", self.request.host, self.target.repository)
        }
    }
}

/// Original image reference and the repo digest it resolved to.
struct RecordedImage {
    reference: String,
    digest: String,
}

impl DeploymentController {
    /// Update an app's images, rolling back on failure.
    ///
    /// The app never remains `UPDATING` once this returns.
    pub async fn update_app(&self, app_id: &AppId, query: UpdateQuery) -> Result<(), AgentError> {
        let _guard = self.monitor.lock_app(app_id).await;
        let app = self.load(app_id)?;

        let mut description = app.description.clone();
        let mut services = Vec::with_capacity(query.images.len());
        for image in &query.images {
            services.push(descriptor::replace_service_image(&mut description, image)?);
        }

        let previous = match app.state {
            AppState::Exited => AppState::Exited,
            AppState::Running | AppState::Updating => AppState::Running,
        };
        self.services.update_app_state(app_id, AppState::Updating)?;
        info!(app_id = %app_id, services = ?services, "Updating app");

        let recorded = self.record_digests(&app, &services).await;

        if let Err(e) = self
            .apply_update(app_id, &description, &services, query.eventid.as_deref())
            .await
        {
            warn!(app_id = %app_id, error = %e, "Update failed, rolling back");
            self.rollback_update(&app, &recorded, previous).await;
            return Err(e);
        }

        let persisted = self.services.update_app_info(app_id, &description);
        self.services.update_app_state(app_id, AppState::Running)?;
        persisted?;

        self.refresh_overlays(app_id)?;
        info!(app_id = %app_id, "App updated");
        Ok(())
    }

    /// Repo digests of the images about to be replaced.
    ///
    /// Images the engine has no digest for (never pulled, locally built) are
    /// skipped.
    async fn record_digests(&self, app: &App, services: &[String]) -> Vec<RecordedImage> {
        let names = if services.is_empty() {
            descriptor::service_names(&app.description).unwrap_or_default()
        } else {
            services.to_vec()
        };

        let mut recorded = Vec::new();
        for service in names {
            let Some(reference) = descriptor::service_image(&app.description, &service) else {
                continue;
            };
            if recorded.iter().any(|r: &RecordedImage| r.reference == reference) {
                continue;
            }

            let lookup = match split_repo_tag(reference) {
                (_, Some(_)) => reference.to_string(),
                (repo, None) => format!("{repo}:latest"),
            };

            match self.driver.get_image_digest_by_name(&lookup).await {
                Ok(digest) => {
                    debug!(app_id = %app.id, image = %reference, digest = %digest, "Recorded digest");
                    recorded.push(RecordedImage {
                        reference: reference.to_string(),
                        digest,
                    });
                }
                Err(e) => warn!(app_id = %app.id, image = %reference, error = %e, "No digest to roll back to"),
            }
        }
        recorded
    }

    async fn apply_update(
        &self,
        app_id: &AppId,
        description: &Value,
        services: &[String],
        event_id: Option<&str>,
    ) -> Result<(), AgentError> {
        let file = self.files.write(app_id, description).await?;

        match event_id.filter(|id| !id.is_empty()) {
            Some(event_id) => {
                self.driver
                    .up_with_event(app_id, &file, event_id, self.monitor.sender(), services)
                    .await?
            }
            None => {
                self.driver.pull(app_id, &file, services).await?;
                self.driver.up(app_id, &file, true, services).await?;
            }
        }
        Ok(())
    }

    /// Restore the original images and descriptor, then the prior state.
    /// Secondary failures are logged.
    async fn rollback_update(&self, app: &App, recorded: &[RecordedImage], previous: AppState) {
        let file: PathBuf = match self.prepare(app).await {
            Ok(file) => file,
            Err(e) => {
                error!(app_id = %app.id, error = %e, "Rollback: cannot restore compose file");
                self.files.path(&app.id)
            }
        };

        for image in recorded {
            if let Err(e) = self.driver.image_pull(&image.digest).await {
                error!(digest = %image.digest, error = %e, "Rollback: image pull failed");
                continue;
            }
            let image_id = match self.driver.get_image_id_by_repo_digest(&image.digest).await {
                Ok(id) => id,
                Err(e) => {
                    error!(digest = %image.digest, error = %e, "Rollback: image lookup failed");
                    continue;
                }
            };
            if let Err(e) = self.driver.image_tag(&image_id, &image.reference).await {
                error!(image = %image.reference, error = %e, "Rollback: image tag failed");
            }
        }

        if let Err(e) = self.driver.up(&app.id, &file, true, &[]).await {
            error!(app_id = %app.id, error = %e, "Rollback: compose up failed");
        }
        if previous == AppState::Exited {
            if let Err(e) = self.driver.stop(&app.id, &file).await {
                error!(app_id = %app.id, error = %e, "Rollback: compose stop failed");
            }
        }

        if let Err(e) = self.services.update_app_state(&app.id, previous) {
            error!(app_id = %app.id, error = %e, "Rollback: failed to persist state");
        }
        info!(app_id = %app.id, state = %previous, "Update rolled back");
    }

    /// Clear the registry overlays an update has consumed.
    fn refresh_overlays(&self, app_id: &AppId) -> Result<(), AgentError> {
        let app = self.services.get_app(app_id)?;
        for image in app.images {
            if let Some(changes) = image.changes {
                self.services
                    .update_app_event(app_id, &image.name, &changes.tag, ChangeAction::None)?;
            }
        }
        Ok(())
    }

    /// Record registry push/delete events as image overlays.
    ///
    /// Applying the same payload twice yields the same overlays.
    pub async fn handle_events(
        &self,
        app_id: &AppId,
        notification: RegistryNotification,
    ) -> Result<(), AgentError> {
        let _guard = self.monitor.lock_app(app_id).await;
        self.load(app_id)?;

        for event in notification.events {
            let Some(action) = ChangeAction::from_registry_action(&event.action) else {
                debug!(app_id = %app_id, action = %event.action, "Ignoring registry action");
                continue;
            };

            let image = event.image_name();
            let touched =
                self.services
                    .update_app_event(app_id, &image, &event.target.tag, action)?;
            if touched == 0 {
                debug!(app_id = %app_id, image = %image, "Registry event matches no image");
            } else {
                info!(app_id = %app_id, image = %image, tag = %event.target.tag, action = %event.action, "Image change recorded");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_event_image_name() {
        let notification: RegistryNotification = serde_json::from_str(
            r#"{"events":[
                {"action":"push","target":{"repository":"test","tag":"2.0"},"request":{"host":"test_url:5000"}},
                {"action":"delete","target":{"repository":"library/app"}}
            ]}"#,
        )
        .unwrap();

        assert_eq!(notification.events[0].image_name(), "test_url:5000/test");
        assert_eq!(notification.events[0].target.tag, "2.0");
        assert_eq!(notification.events[1].image_name(), "library/app");
        assert!(notification.events[1].target.tag.is_empty());
    }

    #[test]
    fn test_update_query_defaults() {
        let query: UpdateQuery = serde_json::from_str("{}").unwrap();
        assert!(query.images.is_empty());
        assert!(query.eventid.is_none());
    }
}
