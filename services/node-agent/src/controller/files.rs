//! Per-app compose files on disk.
//!
//! Layout: `<root>/<app_id>/docker-compose.yml`. The file is rewritten from
//! the stored descriptor before each mutating operation and kept while the
//! app exists; the app's event stream refers to it.

use std::path::PathBuf;

use pharos_id::AppId;
use serde_json::Value;
use tracing::{debug, warn};

use crate::descriptor;
use crate::error::AgentError;

const COMPOSE_FILE_NAME: &str = "docker-compose.yml";

/// Compose file store rooted at a directory.
#[derive(Debug, Clone)]
pub struct ComposeFiles {
    root: PathBuf,
}

impl ComposeFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the app's compose file.
    pub fn path(&self, app_id: &AppId) -> PathBuf {
        self.root.join(app_id.as_str()).join(COMPOSE_FILE_NAME)
    }

    /// Render the descriptor into the app's compose file.
    pub async fn write(&self, app_id: &AppId, description: &Value) -> Result<PathBuf, AgentError> {
        let path = self.path(app_id);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let yaml = descriptor::to_yaml(description)?;
        tokio::fs::write(&path, yaml).await?;
        debug!(app_id = %app_id, path = %path.display(), "Compose file written");
        Ok(path)
    }

    /// Existing compose file, written from the descriptor only if missing.
    pub async fn ensure(&self, app_id: &AppId, description: &Value) -> Result<PathBuf, AgentError> {
        let path = self.path(app_id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(path);
        }
        self.write(app_id, description).await
    }

    /// Remove the app's compose directory. Missing directories are ignored.
    pub async fn remove(&self, app_id: &AppId) {
        let dir = self.root.join(app_id.as_str());
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(app_id = %app_id, "Compose file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(app_id = %app_id, error = %e, "Failed to remove compose file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let files = ComposeFiles::new(dir.path());
        let description =
            descriptor::yaml_to_json("services:\n  web:\n    image: nginx:1.25\n").unwrap();
        let id = descriptor::app_id(&description).unwrap();

        let path = files.write(&id, &description).await.unwrap();
        assert_eq!(path, dir.path().join(id.as_str()).join("docker-compose.yml"));

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(descriptor::yaml_to_json(&written).unwrap(), description);

        files.remove(&id).await;
        assert!(!path.exists());
        files.remove(&id).await;
    }

    #[tokio::test]
    async fn test_ensure_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = ComposeFiles::new(dir.path());
        let original =
            descriptor::yaml_to_json("services:\n  web:\n    image: nginx:1.25\n").unwrap();
        let updated =
            descriptor::yaml_to_json("services:\n  web:\n    image: nginx:1.27\n").unwrap();
        let id = descriptor::app_id(&original).unwrap();

        files.write(&id, &updated).await.unwrap();
        let path = files.ensure(&id, &original).await.unwrap();

        let on_disk = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(descriptor::yaml_to_json(&on_disk).unwrap(), updated);
    }
}
