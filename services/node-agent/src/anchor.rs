//! Anchor (control plane) API client.
//!
//! Provides methods for communicating with the anchor:
//! - Registering the node
//! - Pinging on the health interval
//! - Posting event notifications
//!
//! The base URL is rebuilt from the environment on every call, so a changed
//! `ANCHOR_ADDRESS` takes effect without a restart.

use std::net::Ipv4Addr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::error::AgentError;

pub const ANCHOR_ADDRESS_ENV: &str = "ANCHOR_ADDRESS";
pub const ANCHOR_REVERSE_PROXY_ENV: &str = "ANCHOR_REVERSE_PROXY";

const DIRECT_PORT: u16 = 48099;
const PROXY_PORT: u16 = 80;
const PROXY_PREFIX: &str = "/pharos-anchor";
const API_PREFIX: &str = "/api/v1";

pub const REGISTER_PATH: &str = "/management/nodes/register";
pub const NOTIFICATION_PATH: &str = "/notification/events";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors talking to the anchor.
#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("{ANCHOR_ADDRESS_ENV} is not set")]
    AddressMissing,

    #[error("invalid anchor address: {0}")]
    InvalidAddress(String),

    #[error("anchor request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("anchor returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<AnchorError> for AgentError {
    fn from(err: AnchorError) -> Self {
        match &err {
            AnchorError::AddressMissing => Self::NotFound(err.to_string()),
            AnchorError::InvalidAddress(_) => Self::InvalidParam(err.to_string()),
            AnchorError::Transport(e) if e.is_decode() => Self::InvalidJson(err.to_string()),
            AnchorError::Transport(_) => Self::ConnectionError(err.to_string()),
            AnchorError::Status { status: 404, .. } => Self::NotFoundUrl(err.to_string()),
            AnchorError::Status { .. } => Self::Unknown(err.to_string()),
        }
    }
}

/// Parses a boolean flag (`1`, `t`, `true`); anything else is false.
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "t" | "true"
    )
}

/// Base URL of the anchor API for an address.
pub fn anchor_base_url(address: &str, reverse_proxy: bool) -> Result<String, AnchorError> {
    let ip: Ipv4Addr = address
        .trim()
        .parse()
        .map_err(|_| AnchorError::InvalidAddress(address.to_string()))?;

    Ok(if reverse_proxy {
        format!("http://{ip}:{PROXY_PORT}{PROXY_PREFIX}{API_PREFIX}")
    } else {
        format!("http://{ip}:{DIRECT_PORT}{API_PREFIX}")
    })
}

/// Builds an anchor URL from the environment and path parts.
pub fn make_anchor_request_url(parts: &[&str]) -> Result<String, AnchorError> {
    let address = std::env::var(ANCHOR_ADDRESS_ENV).map_err(|_| AnchorError::AddressMissing)?;
    let reverse_proxy = std::env::var(ANCHOR_REVERSE_PROXY_ENV)
        .map(|v| parse_flag(&v))
        .unwrap_or(false);

    let mut url = anchor_base_url(&address, reverse_proxy)?;
    for part in parts {
        url.push_str(part);
    }
    Ok(url)
}

/// Registration request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub ip: String,
    pub config: RegisterConfig,
}

/// Device properties sent on registration, one `{name: value}` map each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterConfig {
    pub properties: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Registration response.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    pub id: String,
}

/// Ping request body.
#[derive(Debug, Clone, Serialize)]
pub struct PingRequest {
    pub interval: String,
}

/// Result of a ping the anchor answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    Ok,
    /// The anchor no longer knows this node.
    UnknownNode,
}

/// Event notification body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub eventid: Vec<String>,
    pub nodeid: String,
    pub appid: String,
    pub status: String,
    pub imagename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Anchor API client.
#[derive(Clone)]
pub struct AnchorClient {
    client: reqwest::Client,
    /// Fixed base URL; `None` reads the environment per request.
    base_url: Option<String>,
}

impl AnchorClient {
    /// Create a client that resolves the anchor from the environment.
    pub fn new() -> Result<Self, AnchorError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: None,
        })
    }

    /// Create a client bound to a fixed base URL (including `/api/v1`).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, AnchorError> {
        let mut anchor = Self::new()?;
        anchor.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        Ok(anchor)
    }

    fn url(&self, parts: &[&str]) -> Result<String, AnchorError> {
        match &self.base_url {
            Some(base) => Ok(parts.iter().fold(base.clone(), |mut url, part| {
                url.push_str(part);
                url
            })),
            None => make_anchor_request_url(parts),
        }
    }

    /// Register this node.
    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, AnchorError> {
        let url = self.url(&[REGISTER_PATH])?;
        debug!(url = %url, ip = %request.ip, "Registering with anchor");

        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Registration rejected");
            return Err(AnchorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    /// Ping on behalf of `node_id`.
    pub async fn ping(&self, node_id: &str, interval_minutes: u64) -> Result<PingOutcome, AnchorError> {
        let path = format!("/management/nodes/{node_id}/ping");
        let url = self.url(&[&path])?;
        let request = PingRequest {
            interval: interval_minutes.to_string(),
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(PingOutcome::UnknownNode);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnchorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(node_id = %node_id, "Ping acknowledged");
        Ok(PingOutcome::Ok)
    }

    /// Post an event notification.
    pub async fn post_notification(&self, notification: &Notification) -> Result<(), AnchorError> {
        let url = self.url(&[NOTIFICATION_PATH])?;

        let response = self.client.post(&url).json(notification).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AnchorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}
