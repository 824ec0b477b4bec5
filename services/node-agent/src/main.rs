//! Pharos Node Agent
//!
//! Runs on an edge device, serves the management REST API and keeps the
//! device registered with the anchor.
//!
//! ## Startup
//!
//! - Load configuration and seed device properties
//! - Start the event consumer
//! - Recover persisted apps, then register with the anchor
//! - Serve until ctrl-c, then stop the ticker and event streams

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pharos_node_agent::agent::{Agent, AgentParts};
use pharos_node_agent::anchor::AnchorClient;
use pharos_node_agent::api::{create_router, state::ApiState};
use pharos_node_agent::config::Config;
use pharos_node_agent::device::SystemContainerClient;
use pharos_node_agent::engine::{DockerCompose, DockerComposeConfig};
use pharos_node_agent::health::HealthConfig;
use pharos_node_agent::repository::Repositories;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to PHAROS_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir.display(),
        docker_socket = %config.docker_socket.display(),
        "Starting pharos node agent"
    );

    for dir in [config.store_dir(), config.compose_dir()] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let repos = Repositories::open(config.store_dir()).context("failed to open local store")?;
    config.seed_properties(&repos.config)?;

    let driver = Arc::new(DockerCompose::new(DockerComposeConfig {
        compose_bin: config.compose_bin.clone(),
        socket: config.docker_socket.clone(),
    }));

    let agent = Arc::new(Agent::new(AgentParts {
        repos,
        driver,
        anchor: AnchorClient::new()?,
        device: SystemContainerClient::new()?,
        compose_dir: config.compose_dir(),
        data_dir: config.data_dir.clone(),
        health: HealthConfig::default(),
    }));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_handle = agent.spawn_monitor(shutdown_rx);

    agent.start().await?;

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "REST API listening");

    let router = create_router(ApiState::new(agent.clone()));
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        })
        .await
        .context("REST server failed")?;

    agent.shutdown().await;
    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor_handle.await {
        error!(error = %e, "Event consumer task panicked");
    }

    info!("Node agent shutdown complete");
    Ok(())
}
