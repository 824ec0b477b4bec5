//! Start, stop, delete and startup recovery.

use pharos_id::AppId;
use tracing::{error, info, warn};

use super::DeploymentController;
use crate::error::AgentError;
use crate::model::AppState;

impl DeploymentController {
    /// Start a stopped app.
    pub async fn start_app(&self, app_id: &AppId) -> Result<(), AgentError> {
        let _guard = self.monitor.lock_app(app_id).await;
        let app = self.load(app_id)?;
        if app.state != AppState::Exited {
            return Err(AgentError::AlreadyReported(format!(
                "app {app_id} is {}",
                app.state
            )));
        }

        let file = self.prepare(&app).await?;
        if let Err(e) = self.driver.start(app_id, &file).await {
            warn!(app_id = %app_id, error = %e, "Start failed, stopping app");
            if let Err(e) = self.driver.stop(app_id, &file).await {
                error!(app_id = %app_id, error = %e, "Compensating stop failed");
            }
            if let Err(e) = self.services.update_app_state(app_id, AppState::Exited) {
                error!(app_id = %app_id, error = %e, "Failed to persist state");
            }
            return Err(e.into());
        }

        self.services.update_app_state(app_id, AppState::Running)?;
        info!(app_id = %app_id, "App started");
        Ok(())
    }

    /// Stop a running app.
    pub async fn stop_app(&self, app_id: &AppId) -> Result<(), AgentError> {
        let _guard = self.monitor.lock_app(app_id).await;
        let app = self.load(app_id)?;
        if app.state != AppState::Running {
            return Err(AgentError::AlreadyReported(format!(
                "app {app_id} is {}",
                app.state
            )));
        }

        let file = self.prepare(&app).await?;
        if let Err(e) = self.driver.stop(app_id, &file).await {
            warn!(app_id = %app_id, error = %e, "Stop failed, bringing app back up");
            if let Err(e) = self.driver.up(app_id, &file, false, &[]).await {
                error!(app_id = %app_id, error = %e, "Compensating up failed");
            }
            if let Err(e) = self.services.update_app_state(app_id, AppState::Running) {
                error!(app_id = %app_id, error = %e, "Failed to persist state");
            }
            return Err(e.into());
        }

        self.services.update_app_state(app_id, AppState::Exited)?;
        info!(app_id = %app_id, "App stopped");
        Ok(())
    }

    /// Tear an app down and forget it.
    ///
    /// Images still referenced by another repository are left in place.
    pub async fn delete_app(&self, app_id: &AppId) -> Result<(), AgentError> {
        let _guard = self.monitor.lock_app(app_id).await;
        let app = self.load(app_id)?;
        let file = self.prepare(&app).await?;

        if let Err(e) = self.driver.down_with_remove_images(app_id, &file).await {
            let e = AgentError::from(e);
            if !e.is_repository_conflict() {
                return Err(e);
            }
            info!(app_id = %app_id, "Shared image kept while deleting app");
        }

        if let Err(e) = self.monitor.disable(app_id).await {
            error!(app_id = %app_id, error = %e, "Disabling events failed, restoring app");
            if let Err(e) = self.driver.up(app_id, &file, false, &[]).await {
                error!(app_id = %app_id, error = %e, "Compensating up failed");
            }
            if let Err(e) = self.services.update_app_state(app_id, AppState::Running) {
                error!(app_id = %app_id, error = %e, "Failed to persist state");
            }
            return Err(e);
        }

        self.services.delete_app(app_id)?;
        self.files.remove(app_id).await;
        info!(app_id = %app_id, "App deleted");
        Ok(())
    }

    /// Bring the engine in line with persisted state after a restart.
    ///
    /// An app caught mid-update is brought up and marked running. Failures
    /// are logged and the app skipped.
    pub async fn recover(&self) -> Result<(), AgentError> {
        let apps = self.services.get_apps()?;
        info!(count = apps.len(), "Recovering apps");

        for app in apps {
            let _guard = self.monitor.lock_app(&app.id).await;

            let file = match self.prepare(&app).await {
                Ok(file) => file,
                Err(e) => {
                    warn!(app_id = %app.id, error = %e, "Recovery: cannot write compose file");
                    continue;
                }
            };

            if let Err(e) = self.monitor.enable(&app.id, &file).await {
                warn!(app_id = %app.id, error = %e, "Recovery: enabling events failed");
            }

            let result = match app.state {
                AppState::Running | AppState::Updating => self
                    .driver
                    .up(&app.id, &file, false, &[])
                    .await
                    .map(|_| AppState::Running),
                AppState::Exited => self
                    .driver
                    .stop(&app.id, &file)
                    .await
                    .map(|_| AppState::Exited),
            };

            match result {
                Ok(state) => {
                    if let Err(e) = self.services.update_app_state(&app.id, state) {
                        warn!(app_id = %app.id, error = %e, "Recovery: failed to persist state");
                    } else {
                        info!(app_id = %app.id, state = %state, "App recovered");
                    }
                }
                Err(e) => warn!(app_id = %app.id, error = %e, "Recovery failed"),
            }
        }

        Ok(())
    }
}
