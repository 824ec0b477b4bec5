//! App records in the `service` bucket.

use pharos_id::AppId;
use serde_json::Value;
use tracing::{debug, info};

use super::Inserted;
use crate::descriptor;
use crate::error::AgentError;
use crate::model::{App, AppState, ChangeAction, ChangeStatus, ImageChange};
use crate::store::KvStore;

/// Persistence for [`App`] records.
pub struct ServiceRepository {
    store: KvStore,
}

impl ServiceRepository {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    /// Insert an app for a canonical descriptor.
    ///
    /// The id is derived from the descriptor; if an app with that id already
    /// exists it is returned untouched.
    pub fn insert_compose_file(&self, description: &Value) -> Result<Inserted<App>, AgentError> {
        let id = descriptor::app_id(description)?;
        let app = App {
            id: id.clone(),
            description: description.clone(),
            state: AppState::Running,
            images: descriptor::app_images(description)?,
        };

        if self.store.insert_new(id.as_str(), &app)? {
            info!(app_id = %id, "App record created");
            Ok(Inserted::Created(app))
        } else {
            debug!(app_id = %id, "App record already exists");
            Ok(Inserted::Existing(self.get_app(&id)?))
        }
    }

    /// Get an app by id.
    pub fn get_app(&self, id: &AppId) -> Result<App, AgentError> {
        self.store.get(id.as_str()).map_err(Into::into)
    }

    /// All apps in creation order.
    pub fn get_apps(&self) -> Result<Vec<App>, AgentError> {
        self.store.list().map_err(Into::into)
    }

    /// Persist a new state.
    pub fn update_app_state(&self, id: &AppId, state: AppState) -> Result<(), AgentError> {
        let mut app = self.get_app(id)?;
        app.state = state;
        self.store.put(id.as_str(), &app)?;
        debug!(app_id = %id, state = %state, "App state updated");
        Ok(())
    }

    /// Persist a new descriptor.
    ///
    /// The image list is rebuilt from the descriptor; overlays of images that
    /// are still referenced are kept.
    pub fn update_app_info(&self, id: &AppId, description: &Value) -> Result<(), AgentError> {
        let mut app = self.get_app(id)?;
        let mut images = descriptor::app_images(description)?;

        for image in &mut images {
            image.changes = app
                .images
                .iter()
                .find(|old| old.name == image.name)
                .and_then(|old| old.changes.clone());
        }

        app.description = description.clone();
        app.images = images;
        self.store.put(id.as_str(), &app)?;
        debug!(app_id = %id, "App description updated");
        Ok(())
    }

    /// Record a registry event against every image named `repository`.
    ///
    /// Returns the number of images touched.
    pub fn update_app_event(
        &self,
        id: &AppId,
        repository: &str,
        tag: &str,
        action: ChangeAction,
    ) -> Result<usize, AgentError> {
        let mut app = self.get_app(id)?;
        let mut touched = 0;

        for image in app.images.iter_mut().filter(|i| i.name == repository) {
            image.changes = match action {
                ChangeAction::Update => Some(ImageChange {
                    tag: tag.to_string(),
                    status: ChangeStatus::Update,
                }),
                ChangeAction::Delete => Some(ImageChange {
                    tag: tag.to_string(),
                    status: ChangeStatus::Delete,
                }),
                ChangeAction::None => None,
            };
            touched += 1;
        }

        if touched > 0 {
            self.store.put(id.as_str(), &app)?;
        }
        Ok(touched)
    }

    /// Delete an app record.
    pub fn delete_app(&self, id: &AppId) -> Result<(), AgentError> {
        if !self.store.delete(id.as_str())? {
            return Err(AgentError::NotFound(format!("not found: {id}")));
        }
        info!(app_id = %id, "App record deleted");
        Ok(())
    }
}
