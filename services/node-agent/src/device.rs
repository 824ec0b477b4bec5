//! Device control via the system container.
//!
//! Reboot and restore are performed by a privileged sibling container; the
//! agent only forwards the request to it.

use std::time::Duration;

use tracing::{error, info};

use crate::error::AgentError;

pub const SYSTEM_CONTAINER_ENV: &str = "SYSTEMCONTAINER";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Device action forwarded to the system container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Reboot,
    Restore,
}

impl DeviceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceAction::Reboot => "reboot",
            DeviceAction::Restore => "restore",
        }
    }
}

/// Client for the system container's device API.
#[derive(Clone)]
pub struct SystemContainerClient {
    client: reqwest::Client,
    /// Fixed `host:port`; `None` reads the environment per request.
    address: Option<String>,
}

impl SystemContainerClient {
    pub fn new() -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            address: None,
        })
    }

    /// Bind to a fixed `host:port` instead of `$SYSTEMCONTAINER`.
    pub fn with_address(address: impl Into<String>) -> Result<Self, AgentError> {
        let mut client = Self::new()?;
        client.address = Some(address.into());
        Ok(client)
    }

    fn url(&self, action: DeviceAction) -> Result<String, AgentError> {
        let address = match &self.address {
            Some(address) => address.clone(),
            None => std::env::var(SYSTEM_CONTAINER_ENV).map_err(|_| {
                AgentError::NotFound(format!("{SYSTEM_CONTAINER_ENV} is not set"))
            })?,
        };
        Ok(format!(
            "http://{}/api/v1/management/device/{}",
            address.trim_end_matches('/'),
            action.as_str()
        ))
    }

    /// Forward a device action.
    pub async fn forward(&self, action: DeviceAction) -> Result<(), AgentError> {
        let url = self.url(action)?;
        info!(action = action.as_str(), url = %url, "Forwarding device action");

        let response = self.client.post(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(action = action.as_str(), status = %status, body = %body, "Device action rejected");
            return Err(AgentError::Unknown(format!(
                "system container returned {status}: {body}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_forward_reboot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/management/device/reboot"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let address = server.uri().trim_start_matches("http://").to_string();
        let client = SystemContainerClient::with_address(address).unwrap();
        client.forward(DeviceAction::Reboot).await.unwrap();
    }

    #[tokio::test]
    async fn test_forward_connection_error() {
        let client = SystemContainerClient::with_address("127.0.0.1:9").unwrap();
        let err = client.forward(DeviceAction::Restore).await.unwrap_err();
        assert_eq!(err.kind(), "ConnectionError");
    }
}
