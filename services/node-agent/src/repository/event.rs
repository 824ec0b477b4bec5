//! Event subscriptions in the `event` bucket.

use tracing::{debug, info};

use super::Inserted;
use crate::error::AgentError;
use crate::model::Subscription;
use crate::store::KvStore;

/// Persistence for [`Subscription`] records, keyed by event id.
pub struct EventRepository {
    store: KvStore,
}

impl EventRepository {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    /// Create a subscription; an existing event id returns the stored record.
    pub fn subscribe(&self, subscription: Subscription) -> Result<Inserted<Subscription>, AgentError> {
        if subscription.event_id.is_empty() {
            return Err(AgentError::InvalidParam("eventid is required".to_string()));
        }

        if self.store.insert_new(&subscription.event_id, &subscription)? {
            info!(
                event_id = %subscription.event_id,
                app_id = %subscription.app_id,
                image_name = %subscription.image_name,
                "Subscription created"
            );
            Ok(Inserted::Created(subscription))
        } else {
            let existing = self.store.get(&subscription.event_id)?;
            Ok(Inserted::Existing(existing))
        }
    }

    /// Remove a subscription. Missing subscriptions are not an error.
    pub fn unsubscribe(&self, event_id: &str) -> Result<(), AgentError> {
        if self.store.delete(event_id)? {
            info!(event_id = %event_id, "Subscription removed");
        } else {
            debug!(event_id = %event_id, "Subscription to remove was not present");
        }
        Ok(())
    }

    pub fn get(&self, event_id: &str) -> Result<Subscription, AgentError> {
        self.store.get(event_id).map_err(Into::into)
    }

    pub fn list(&self) -> Result<Vec<Subscription>, AgentError> {
        self.store.list().map_err(Into::into)
    }

    /// Subscriptions whose filters cover `(app_id, image_name)`.
    pub fn matching(&self, app_id: &str, image_name: &str) -> Result<Vec<Subscription>, AgentError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|s| s.matches(app_id, image_name))
            .collect())
    }
}
