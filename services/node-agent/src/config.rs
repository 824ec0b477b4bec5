//! Configuration for the node agent.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::anchor::ANCHOR_ADDRESS_ENV;
use crate::model::Property;
use crate::repository::{ConfigRepository, ANCHOR_ADDRESS, DEVICE_ID, NODE_ADDRESS, PING_INTERVAL};
use crate::resources::HostFacts;

/// Default ping interval in minutes.
pub const DEFAULT_PING_INTERVAL: u64 = 10;

/// Node agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// REST listen address.
    pub listen_addr: SocketAddr,

    /// Data directory for local state.
    pub data_dir: PathBuf,

    /// Docker daemon socket.
    pub docker_socket: PathBuf,

    /// `docker` (compose plugin) or `docker-compose`.
    pub compose_bin: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Optional JSON file with extra default properties.
    pub default_properties: Option<PathBuf>,

    /// Address this node registers with.
    pub node_address: Option<String>,

    /// Anchor IPv4 address.
    pub anchor_address: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("PHAROS_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:48098".to_string())
            .parse()
            .context("PHAROS_LISTEN_ADDR is not a socket address")?;

        let data_dir = std::env::var("PHAROS_DATA_DIR")
            .unwrap_or_else(|_| "/var/lib/pharos-node".to_string())
            .into();

        let docker_socket = std::env::var("PHAROS_DOCKER_SOCKET")
            .unwrap_or_else(|_| "/var/run/docker.sock".to_string())
            .into();

        let compose_bin = std::env::var("PHAROS_COMPOSE_BIN")
            .unwrap_or_else(|_| "docker".to_string())
            .into();

        let log_level = std::env::var("PHAROS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let default_properties = std::env::var("PHAROS_DEFAULT_PROPERTIES").ok().map(PathBuf::from);

        let node_address = non_empty_env("NODE_ADDRESS");
        let anchor_address = non_empty_env(ANCHOR_ADDRESS_ENV);

        Ok(Self {
            listen_addr,
            data_dir,
            docker_socket,
            compose_bin,
            log_level,
            default_properties,
            node_address,
            anchor_address,
        })
    }

    /// Directory holding the KV bucket files.
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    /// Directory holding per-app compose files.
    pub fn compose_dir(&self) -> PathBuf {
        self.data_dir.join("compose")
    }

    /// Seed device properties.
    ///
    /// Host facts and environment-provided addresses are refreshed on every
    /// start; user-tunable defaults and the device id are only written once.
    pub fn seed_properties(&self, repo: &ConfigRepository) -> Result<()> {
        let facts = HostFacts::detect(&self.data_dir);
        for (name, value) in [
            ("os", facts.os),
            ("platform", facts.platform),
            ("processor", facts.processor),
            ("cpu", facts.cpu),
            ("mem", facts.mem),
            ("disk", facts.disk),
        ] {
            repo.seed(&Property::new(name, value, true), true)?;
        }

        if let Some(address) = &self.node_address {
            repo.seed(&Property::new(NODE_ADDRESS, address.as_str(), true), true)?;
        }
        if let Some(address) = &self.anchor_address {
            repo.seed(&Property::new(ANCHOR_ADDRESS, address.as_str(), true), true)?;
        }

        repo.seed(
            &Property::new(PING_INTERVAL, DEFAULT_PING_INTERVAL.to_string(), false),
            false,
        )?;
        repo.seed(
            &Property::new(DEVICE_ID, uuid::Uuid::new_v4().to_string(), true),
            false,
        )?;

        if let Some(path) = &self.default_properties {
            let properties = load_default_properties(path)?;
            info!(path = %path.display(), count = properties.len(), "Loaded default properties");
            for property in &properties {
                repo.seed(property, false)?;
            }
        }

        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Deserialize)]
struct PropertiesFile {
    properties: Vec<Property>,
}

/// Reads `{"properties": [...]}` from a JSON file.
pub fn load_default_properties(path: &Path) -> Result<Vec<Property>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file: PropertiesFile = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(file.properties)
}
