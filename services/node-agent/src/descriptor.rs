//! Compose descriptor handling.
//!
//! Descriptors arrive as YAML and are stored in canonical JSON form (object
//! keys ordered). Only the `services.<name>.image` fields are interpreted;
//! everything else is round-tripped verbatim to the compose file.

use pharos_id::{split_repo_tag, strip_tag, AppId};
use serde_json::{Map, Value};

use crate::error::AgentError;
use crate::model::AppImage;

const SERVICES_FIELD: &str = "services";
const IMAGE_FIELD: &str = "image";

/// Converts a YAML descriptor into its canonical JSON form.
pub fn yaml_to_json(yaml: &str) -> Result<Value, AgentError> {
    let value: Value = serde_yaml::from_str(yaml)
        .map_err(|e| AgentError::InvalidYaml(format!("invalid yaml: {e}")))?;

    if !value.is_object() {
        return Err(AgentError::InvalidYaml(
            "descriptor must be a mapping".to_string(),
        ));
    }

    Ok(value)
}

/// Renders a canonical descriptor back to YAML for the compose file.
pub fn to_yaml(description: &Value) -> Result<String, AgentError> {
    serde_yaml::to_string(description).map_err(Into::into)
}

/// Returns the `services` mapping, rejecting a missing or empty one.
pub fn services(description: &Value) -> Result<&Map<String, Value>, AgentError> {
    match description.get(SERVICES_FIELD).and_then(Value::as_object) {
        Some(services) if !services.is_empty() => Ok(services),
        _ => Err(AgentError::InvalidYaml(
            "there is no services field".to_string(),
        )),
    }
}

/// Service names in descriptor order.
pub fn service_names(description: &Value) -> Result<Vec<String>, AgentError> {
    Ok(services(description)?.keys().cloned().collect())
}

/// `(service_name, image)` pairs; `image` is `None` when absent or not a string.
pub fn service_images(description: &Value) -> Result<Vec<(String, Option<String>)>, AgentError> {
    Ok(services(description)?
        .iter()
        .map(|(name, service)| {
            let image = service
                .get(IMAGE_FIELD)
                .and_then(Value::as_str)
                .map(str::to_string);
            (name.clone(), image)
        })
        .collect())
}

/// Derives the content-addressed id of a descriptor.
pub fn app_id(description: &Value) -> Result<AppId, AgentError> {
    AppId::derive(service_images(description)?).map_err(Into::into)
}

/// Builds the per-service image list (tag stripped, no overlays).
pub fn app_images(description: &Value) -> Result<Vec<AppImage>, AgentError> {
    service_images(description)?
        .into_iter()
        .map(|(name, image)| match image {
            Some(image) => Ok(AppImage {
                name: strip_tag(&image),
                changes: None,
            }),
            None => Err(AgentError::InvalidYaml(format!(
                "service '{name}' has no image field"
            ))),
        })
        .collect()
}

/// Full image reference of a service.
pub fn service_image<'a>(description: &'a Value, service_name: &str) -> Option<&'a str> {
    description
        .get(SERVICES_FIELD)?
        .get(service_name)?
        .get(IMAGE_FIELD)?
        .as_str()
}

/// Tag-stripped image name of a service.
pub fn service_image_name(description: &Value, service_name: &str) -> Option<String> {
    service_image(description, service_name).map(strip_tag)
}

/// Rewrites the image of the service whose repository matches `image_ref`.
///
/// Returns the name of the rewritten service.
pub fn replace_service_image(description: &mut Value, image_ref: &str) -> Result<String, AgentError> {
    let (repo, _) = split_repo_tag(image_ref);

    let services = description
        .get_mut(SERVICES_FIELD)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| AgentError::InvalidYaml("there is no services field".to_string()))?;

    for (name, service) in services.iter_mut() {
        let matches = service
            .get(IMAGE_FIELD)
            .and_then(Value::as_str)
            .map(|current| split_repo_tag(current).0 == repo)
            .unwrap_or(false);

        if matches {
            if let Some(fields) = service.as_object_mut() {
                fields.insert(IMAGE_FIELD.to_string(), Value::String(image_ref.to_string()));
                return Ok(name.clone());
            }
        }
    }

    Err(AgentError::NotFoundImage(format!(
        "no service uses image repository {repo}"
    )))
}
