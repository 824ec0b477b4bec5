//! Registration with the anchor and the periodic ping loop.
//!
//! The node registers once at startup; on success a ticker pings the anchor
//! every `pinginterval` minutes. A 404 from the ping means the anchor has
//! forgotten the node, which triggers a fresh registration before pinging
//! resumes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval};
use tracing::{debug, error, info, warn};

use crate::anchor::{AnchorClient, PingOutcome, RegisterConfig, RegisterRequest};
use crate::error::AgentError;
use crate::repository::{ConfigRepository, ANCHOR_ADDRESS, NODE_ADDRESS, NODE_ID};

/// Health loop settings.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Length of one `pinginterval` unit.
    pub interval_unit: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_unit: Duration::from_secs(60),
        }
    }
}

struct Ticker {
    quit: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owner of the registration state and ping ticker.
pub struct HealthChecker {
    config: Arc<ConfigRepository>,
    anchor: AnchorClient,
    settings: HealthConfig,
    ticker: Mutex<Option<Ticker>>,
}

impl HealthChecker {
    pub fn new(config: Arc<ConfigRepository>, anchor: AnchorClient, settings: HealthConfig) -> Self {
        Self {
            config,
            anchor,
            settings,
            ticker: Mutex::new(None),
        }
    }

    /// Register with the anchor and start pinging.
    ///
    /// Returns the node id assigned by the anchor.
    pub async fn register(&self) -> Result<String, AgentError> {
        let node_id = register_once(&self.config, &self.anchor).await?;
        self.start_health_check().await?;
        Ok(node_id)
    }

    /// (Re)start the ping ticker with the configured interval.
    pub async fn start_health_check(&self) -> Result<(), AgentError> {
        let minutes = self.config.ping_interval()?;
        let mut ticker = self.ticker.lock().await;
        if let Some(old) = ticker.take() {
            stop_ticker(old).await;
        }

        let (quit, quit_rx) = watch::channel(false);
        let task = tokio::spawn(ping_loop(
            self.config.clone(),
            self.anchor.clone(),
            self.settings.interval_unit,
            minutes,
            quit_rx,
        ));
        *ticker = Some(Ticker { quit, task });

        info!(interval_minutes = minutes, "Health check started");
        Ok(())
    }

    /// Stop the ping ticker and wait for it to exit.
    pub async fn stop_health_check(&self) {
        if let Some(ticker) = self.ticker.lock().await.take() {
            stop_ticker(ticker).await;
            info!("Health check stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.ticker.lock().await.is_some()
    }

    /// Restart the ticker after an interval change, if registered.
    pub async fn restart(&self) -> Result<(), AgentError> {
        if self.config.node_id()?.is_empty() || !self.is_running().await {
            return Ok(());
        }
        self.start_health_check().await
    }

    /// Forget the node id and stop pinging. The anchor is not contacted.
    pub async fn unregister(&self) -> Result<(), AgentError> {
        self.config.set_node_id("")?;
        self.stop_health_check().await;
        info!("Node unregistered");
        Ok(())
    }
}

async fn stop_ticker(ticker: Ticker) {
    let _ = ticker.quit.send(true);
    if let Err(e) = ticker.task.await {
        error!(error = %e, "Ping task failed");
    }
}

/// Registration body: node address plus every property except the
/// identity and address ones.
pub fn build_register_request(config: &ConfigRepository) -> Result<RegisterRequest, AgentError> {
    let ip = config.get_property(NODE_ADDRESS)?.value_string();
    if ip.is_empty() {
        return Err(AgentError::InvalidParam(format!("{NODE_ADDRESS} is empty")));
    }

    let properties = config
        .get_properties()?
        .into_iter()
        .filter(|p| ![NODE_ID, ANCHOR_ADDRESS, NODE_ADDRESS].contains(&p.name.as_str()))
        .map(|p| {
            let mut entry = serde_json::Map::new();
            entry.insert(p.name, p.value);
            entry
        })
        .collect();

    Ok(RegisterRequest {
        ip,
        config: RegisterConfig { properties },
    })
}

async fn register_once(config: &ConfigRepository, anchor: &AnchorClient) -> Result<String, AgentError> {
    let request = build_register_request(config)?;
    let response = anchor.register(&request).await?;
    config.set_node_id(&response.id)?;
    info!(node_id = %response.id, "Registered with anchor");
    Ok(response.id)
}

fn ping_timer(unit: Duration, minutes: u64) -> Interval {
    let period = unit.saturating_mul(u32::try_from(minutes).unwrap_or(u32::MAX));
    interval_at(Instant::now() + period, period)
}

async fn ping_loop(
    config: Arc<ConfigRepository>,
    anchor: AnchorClient,
    unit: Duration,
    mut minutes: u64,
    mut quit: watch::Receiver<bool>,
) {
    let mut timer = ping_timer(unit, minutes);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let node_id = match config.node_id() {
                    Ok(id) if !id.is_empty() => id,
                    Ok(_) => {
                        debug!("Not registered, skipping ping");
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read node id");
                        continue;
                    }
                };

                match anchor.ping(&node_id, minutes).await {
                    Ok(PingOutcome::Ok) => {}
                    Ok(PingOutcome::UnknownNode) => {
                        warn!(node_id = %node_id, "Anchor does not know this node, re-registering");
                        if let Err(e) = register_once(&config, &anchor).await {
                            warn!(error = %e, "Re-registration failed");
                        }
                        minutes = config.ping_interval().unwrap_or(minutes);
                        timer = ping_timer(unit, minutes);
                    }
                    Err(e) => warn!(node_id = %node_id, error = %e, "Ping failed"),
                }
            }
            changed = quit.changed() => {
                if changed.is_err() || *quit.borrow() {
                    debug!("Ping loop shutting down");
                    break;
                }
            }
        }
    }
}
