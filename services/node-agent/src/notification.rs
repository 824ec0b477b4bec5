//! Event notification dispatcher.
//!
//! Turns pipeline events into anchor notifications. Events carrying an id
//! (deploy progress) go to exactly that id; all others fan out to every
//! subscription whose filters cover the event's app and image.

use std::sync::Arc;

use async_trait::async_trait;
use pharos_id::AppId;
use tracing::{debug, warn};

use crate::anchor::{AnchorClient, Notification};
use crate::descriptor;
use crate::error::AgentError;
use crate::model::Event;
use crate::monitor::EventHandler;
use crate::repository::{ConfigRepository, EventRepository, ServiceRepository};

/// Sends notifications for monitored events.
pub struct NotificationDispatcher {
    services: Arc<ServiceRepository>,
    events: Arc<EventRepository>,
    config: Arc<ConfigRepository>,
    anchor: AnchorClient,
}

impl NotificationDispatcher {
    pub fn new(
        services: Arc<ServiceRepository>,
        events: Arc<EventRepository>,
        config: Arc<ConfigRepository>,
        anchor: AnchorClient,
    ) -> Self {
        Self {
            services,
            events,
            config,
            anchor,
        }
    }

    /// Tag-stripped image of the event's service, empty if unknown.
    fn image_name(&self, event: &Event) -> String {
        let Ok(app_id) = AppId::parse(&event.app_id) else {
            return String::new();
        };
        self.services
            .get_app(&app_id)
            .ok()
            .and_then(|app| descriptor::service_image_name(&app.description, &event.service_name))
            .unwrap_or_default()
    }

    /// Build the notification for an event; `None` if nobody is subscribed.
    pub fn build_notification(&self, event: &Event) -> Result<Option<Notification>, AgentError> {
        let image_name = self.image_name(event);

        let event_ids = match &event.id {
            Some(id) if !id.is_empty() => vec![id.clone()],
            _ => self
                .events
                .matching(&event.app_id, &image_name)?
                .into_iter()
                .map(|s| s.event_id)
                .collect(),
        };

        if event_ids.is_empty() {
            return Ok(None);
        }

        Ok(Some(Notification {
            eventid: event_ids,
            nodeid: self.config.node_id()?,
            appid: event.app_id.clone(),
            status: event.status.clone(),
            imagename: image_name,
            cid: event.cid.clone(),
            timestamp: event.timestamp,
        }))
    }

    /// Send the notification for an event. Failures are logged and dropped.
    pub async fn dispatch(&self, event: &Event) {
        let notification = match self.build_notification(event) {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                debug!(
                    app_id = %event.app_id,
                    service = %event.service_name,
                    "No subscription matches event"
                );
                return;
            }
            Err(e) => {
                warn!(app_id = %event.app_id, error = %e, "Failed to build notification");
                return;
            }
        };

        match self.anchor.post_notification(&notification).await {
            Ok(()) => debug!(
                app_id = %notification.appid,
                status = %notification.status,
                subscribers = notification.eventid.len(),
                "Notification sent"
            ),
            Err(e) => warn!(
                app_id = %notification.appid,
                status = %notification.status,
                error = %e,
                "Failed to send notification"
            ),
        }
    }
}

#[async_trait]
impl EventHandler for NotificationDispatcher {
    async fn handle(&self, event: Event) {
        self.dispatch(&event).await;
    }
}
