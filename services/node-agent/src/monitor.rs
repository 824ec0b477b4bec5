//! App event monitor.
//!
//! Owns the process-wide fan-in channel that every engine event stream
//! writes into, the set of apps whose streams are open, and the per-app
//! locks that serialize controller operations. A single consumer loop
//! drains the channel into an [`EventHandler`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use pharos_id::AppId;
use tokio::sync::{mpsc, watch, Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::engine::{ComposeDriver, EventSink};
use crate::error::AgentError;
use crate::model::Event;

/// Capacity of the fan-in channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Consumer of monitored events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event);
}

/// Gate between engine event streams and the notification pipeline.
pub struct AppEventMonitor {
    driver: Arc<dyn ComposeDriver>,
    tx: mpsc::Sender<Event>,
    /// Taken by the consumer loop.
    rx: Mutex<Option<mpsc::Receiver<Event>>>,
    /// Apps with an open stream, and the compose file it was opened with.
    enabled: Mutex<HashMap<String, PathBuf>>,
    /// Per-app operation locks.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AppEventMonitor {
    pub fn new(driver: Arc<dyn ComposeDriver>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            driver,
            tx,
            rx: Mutex::new(Some(rx)),
            enabled: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Sender into the fan-in channel.
    pub fn sender(&self) -> EventSink {
        self.tx.clone()
    }

    /// Open the app's engine event stream. No-op if already open.
    pub async fn enable(&self, app_id: &AppId, file: &Path) -> Result<(), AgentError> {
        let mut enabled = self.enabled.lock().await;
        if enabled.contains_key(app_id.as_str()) {
            debug!(app_id = %app_id, "Events already enabled");
            return Ok(());
        }

        self.driver
            .events(app_id, file, Some(self.sender()))
            .await?;
        enabled.insert(app_id.to_string(), file.to_path_buf());
        info!(app_id = %app_id, "Events enabled");
        Ok(())
    }

    /// Close the app's engine event stream. No-op if not open.
    pub async fn disable(&self, app_id: &AppId) -> Result<(), AgentError> {
        let mut enabled = self.enabled.lock().await;
        let Some(file) = enabled.get(app_id.as_str()).cloned() else {
            debug!(app_id = %app_id, "Events already disabled");
            return Ok(());
        };

        self.driver.events(app_id, &file, None).await?;
        enabled.remove(app_id.as_str());
        info!(app_id = %app_id, "Events disabled");
        Ok(())
    }

    /// Close every open stream, logging failures.
    pub async fn disable_all(&self) {
        let ids: Vec<String> = self.enabled.lock().await.keys().cloned().collect();
        for id in ids {
            let Ok(app_id) = AppId::parse(&id) else {
                continue;
            };
            if let Err(e) = self.disable(&app_id).await {
                warn!(app_id = %app_id, error = %e, "Failed to disable events");
            }
        }
    }

    pub async fn is_enabled(&self, app_id: &AppId) -> bool {
        self.enabled.lock().await.contains_key(app_id.as_str())
    }

    /// Take the app's exclusive operation lock.
    pub async fn lock_app(&self, app_id: &AppId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(app_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drain the fan-in channel into `handler` until shutdown.
    ///
    /// Only the first call consumes events; later calls return immediately.
    pub async fn run(&self, handler: Arc<dyn EventHandler>, mut shutdown: watch::Receiver<bool>) {
        let Some(mut rx) = self.rx.lock().await.take() else {
            warn!("Event monitor consumer already running");
            return;
        };

        info!("Event monitor started");

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        debug!(
                            app_id = %event.app_id,
                            service = %event.service_name,
                            status = %event.status,
                            "Dispatching event"
                        );
                        handler.handle(event).await;
                    }
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Event monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineOp, MockComposeDriver};
    use std::time::Duration;

    struct Collect(mpsc::UnboundedSender<Event>);

    #[async_trait]
    impl EventHandler for Collect {
        async fn handle(&self, event: Event) {
            let _ = self.0.send(event);
        }
    }

    fn app_id() -> AppId {
        AppId::parse("2c4084a992d20c0286edc0b39d444104e1913024").unwrap()
    }

    #[tokio::test]
    async fn test_enable_disable_idempotent() {
        let driver = Arc::new(MockComposeDriver::new());
        let monitor = AppEventMonitor::new(driver.clone());
        let id = app_id();
        let file = Path::new("f.yml");

        monitor.enable(&id, file).await.unwrap();
        monitor.enable(&id, file).await.unwrap();
        assert_eq!(driver.count(EngineOp::Events), 1);
        assert!(monitor.is_enabled(&id).await);

        monitor.disable(&id).await.unwrap();
        monitor.disable(&id).await.unwrap();
        assert_eq!(driver.count(EngineOp::Events), 2);
        assert!(!monitor.is_enabled(&id).await);
    }

    #[tokio::test]
    async fn test_failed_disable_keeps_enabled() {
        let driver = Arc::new(MockComposeDriver::new());
        let monitor = AppEventMonitor::new(driver.clone());
        let id = app_id();

        monitor.enable(&id, Path::new("f.yml")).await.unwrap();
        driver.fail_once(EngineOp::Events, "boom");
        assert!(monitor.disable(&id).await.is_err());
        assert!(monitor.is_enabled(&id).await);
    }

    #[tokio::test]
    async fn test_consumer_forwards_events() {
        let driver = Arc::new(MockComposeDriver::new());
        let monitor = Arc::new(AppEventMonitor::new(driver.clone()));
        let id = app_id();
        let (handled_tx, mut handled_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let consumer = {
            let monitor = monitor.clone();
            tokio::spawn(async move {
                monitor.run(Arc::new(Collect(handled_tx)), shutdown_rx).await;
            })
        };

        monitor.enable(&id, Path::new("f.yml")).await.unwrap();
        assert!(
            driver
                .emit(Event::container(id.as_str(), "web", "started", None))
                .await
        );

        let event = tokio::time::timeout(Duration::from_secs(1), handled_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.service_name, "web");

        shutdown_tx.send(true).unwrap();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_app_serializes() {
        let driver = Arc::new(MockComposeDriver::new());
        let monitor = Arc::new(AppEventMonitor::new(driver));
        let id = app_id();

        let guard = monitor.lock_app(&id).await;
        let waiter = {
            let monitor = monitor.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = monitor.lock_app(&id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
