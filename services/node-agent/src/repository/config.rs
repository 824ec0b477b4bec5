//! Device properties in the `configuration` bucket.

use tracing::{debug, info};

use crate::error::AgentError;
use crate::model::Property;
use crate::store::{KvStore, StoreError};

pub const NODE_ID: &str = "nodeid";
pub const DEVICE_ID: &str = "deviceid";
pub const NODE_ADDRESS: &str = "nodeaddress";
pub const ANCHOR_ADDRESS: &str = "anchoraddress";
pub const PING_INTERVAL: &str = "pinginterval";

/// Persistence for [`Property`] records, keyed by name.
pub struct ConfigRepository {
    store: KvStore,
}

impl ConfigRepository {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    /// Store a property if absent, or unconditionally when `overwrite` is set.
    pub fn seed(&self, property: &Property, overwrite: bool) -> Result<(), AgentError> {
        if overwrite {
            self.store.put(&property.name, property)?;
        } else if self.store.insert_new(&property.name, property)? {
            debug!(name = %property.name, "Seeded default property");
        }
        Ok(())
    }

    pub fn get_property(&self, name: &str) -> Result<Property, AgentError> {
        self.store.get(name).map_err(|e| match e {
            StoreError::NotFound(_) => AgentError::NotFound(format!("property {name} not found")),
            other => other.into(),
        })
    }

    pub fn get_properties(&self) -> Result<Vec<Property>, AgentError> {
        self.store.list().map_err(Into::into)
    }

    /// Write a property, bypassing the read-only flag. Internal use only.
    pub fn set_property(&self, property: &Property) -> Result<(), AgentError> {
        self.store.put(&property.name, property)?;
        Ok(())
    }

    /// Fails with `InvalidParam` if `name` exists and is read-only.
    pub fn check_writable(&self, name: &str) -> Result<(), AgentError> {
        match self.store.find::<Property>(name)? {
            Some(existing) if existing.read_only => Err(AgentError::InvalidParam(format!(
                "property {name} is read-only"
            ))),
            _ => Ok(()),
        }
    }

    /// Change the value of a writable property.
    ///
    /// Unknown names create a new writable property.
    pub fn update_property(&self, name: &str, value: serde_json::Value) -> Result<(), AgentError> {
        self.check_writable(name)?;
        let property = match self.store.find::<Property>(name)? {
            Some(mut existing) => {
                existing.value = value;
                existing
            }
            None => Property::new(name, value, false),
        };

        self.store.put(name, &property)?;
        info!(name = %name, "Property updated");
        Ok(())
    }

    /// Current node id, empty when unregistered.
    pub fn node_id(&self) -> Result<String, AgentError> {
        Ok(self
            .store
            .find::<Property>(NODE_ID)?
            .map(|p| p.value_string())
            .unwrap_or_default())
    }

    pub fn set_node_id(&self, node_id: &str) -> Result<(), AgentError> {
        self.set_property(&Property::new(NODE_ID, node_id, true))
    }

    /// Ping interval in minutes.
    pub fn ping_interval(&self) -> Result<u64, AgentError> {
        let property = self.get_property(PING_INTERVAL)?;
        let interval = match &property.value {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };

        match interval {
            Some(minutes) if minutes > 0 => Ok(minutes),
            _ => Err(AgentError::InvalidParam(format!(
                "invalid {PING_INTERVAL}: {}",
                property.value
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Bucket;
    use serde_json::json;

    fn repo() -> ConfigRepository {
        ConfigRepository::new(KvStore::open_in_memory(Bucket::Configuration).unwrap())
    }

    #[test]
    fn test_set_then_get() {
        let repo = repo();
        repo.set_property(&Property::new("os", "linux", true)).unwrap();
        let property = repo.get_property("os").unwrap();
        assert_eq!(property.value, json!("linux"));
        assert!(property.read_only);
    }

    #[test]
    fn test_seed_does_not_overwrite() {
        let repo = repo();
        repo.seed(&Property::new(PING_INTERVAL, "10", false), false)
            .unwrap();
        repo.update_property(PING_INTERVAL, json!("5")).unwrap();
        repo.seed(&Property::new(PING_INTERVAL, "10", false), false)
            .unwrap();
        assert_eq!(repo.ping_interval().unwrap(), 5);

        repo.seed(&Property::new(PING_INTERVAL, "10", false), true)
            .unwrap();
        assert_eq!(repo.ping_interval().unwrap(), 10);
    }

    #[test]
    fn test_update_read_only_rejected() {
        let repo = repo();
        repo.set_property(&Property::new("os", "linux", true)).unwrap();
        assert!(matches!(
            repo.update_property("os", json!("windows")),
            Err(AgentError::InvalidParam(_))
        ));
    }

    #[test]
    fn test_check_writable() {
        let repo = repo();
        repo.set_property(&Property::new("os", "linux", true)).unwrap();
        repo.set_property(&Property::new(PING_INTERVAL, "1", false)).unwrap();

        assert!(matches!(
            repo.check_writable("os"),
            Err(AgentError::InvalidParam(_))
        ));
        assert!(repo.check_writable(PING_INTERVAL).is_ok());
        assert!(repo.check_writable("location").is_ok());
    }

    #[test]
    fn test_node_id_defaults_to_empty() {
        let repo = repo();
        assert_eq!(repo.node_id().unwrap(), "");
        repo.set_node_id("n1").unwrap();
        assert_eq!(repo.node_id().unwrap(), "n1");
    }

    #[test]
    fn test_ping_interval_parsing() {
        let repo = repo();
        assert!(matches!(repo.ping_interval(), Err(AgentError::NotFound(_))));

        repo.update_property(PING_INTERVAL, json!(3)).unwrap();
        assert_eq!(repo.ping_interval().unwrap(), 3);

        repo.update_property(PING_INTERVAL, json!("abc")).unwrap();
        assert!(matches!(
            repo.ping_interval(),
            Err(AgentError::InvalidParam(_))
        ));
    }

    #[test]
    fn test_policy_is_optional() {
        let raw = r#"{"name":"os","value":"linux","readOnly":true}"#;
        let property: Property = serde_json::from_str(raw).unwrap();
        assert!(property.policy.is_none());

        let raw = r#"{"name":"os","value":"linux","readOnly":true,"policy":["readable"]}"#;
        let property: Property = serde_json::from_str(raw).unwrap();
        assert_eq!(property.policy, Some(vec!["readable".to_string()]));
    }
}
