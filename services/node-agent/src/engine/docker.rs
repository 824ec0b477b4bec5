//! Docker Engine API client over the Unix socket.
//!
//! Only the handful of endpoints the agent needs: image list/pull/tag,
//! container inspect and one-shot stats.
//!
//! Reference: https://docs.docker.com/engine/api/v1.43/

use std::collections::HashMap;
use std::path::Path;

use hyper::{body::Buf, Body, Client, Method, Request};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use pharos_id::split_repo_tag;
use serde::Deserialize;
use tracing::{debug, error};

use super::units::{human_readable_binary_unit, human_readable_unit};
use super::{ContainerConfig, ContainerStats, EngineError};

/// Image entry of `GET /images/json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageSummary {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Option<Vec<String>>,
    #[serde(rename = "RepoDigests", default)]
    pub repo_digests: Option<Vec<String>>,
}

impl ImageSummary {
    fn tags(&self) -> impl Iterator<Item = &String> {
        self.repo_tags
            .iter()
            .flatten()
            .filter(|t| t.as_str() != "<none>:<none>")
    }

    fn digests(&self) -> impl Iterator<Item = &String> {
        self.repo_digests
            .iter()
            .flatten()
            .filter(|d| d.as_str() != "<none>@<none>")
    }
}

/// First repo digest of any image tagged `name`.
pub fn find_digest_by_name(images: &[ImageSummary], name: &str) -> Option<String> {
    images
        .iter()
        .filter(|image| image.tags().any(|t| t == name))
        .find_map(|image| image.digests().next().filter(|d| !d.is_empty()).cloned())
}

/// Id of the untagged image carrying `digest`.
pub fn find_id_by_repo_digest(images: &[ImageSummary], digest: &str) -> Option<String> {
    images
        .iter()
        .find(|image| image.digests().any(|d| d == digest) && image.tags().next().is_none())
        .map(|image| image.id.clone())
}

/// Subset of `GET /containers/{name}/json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerInspect {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "State")]
    pub state: InspectState,
    #[serde(rename = "NetworkSettings", default)]
    pub network_settings: Option<NetworkSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InspectState {
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "ExitCode", default)]
    pub exit_code: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkSettings {
    #[serde(rename = "Ports", default)]
    pub ports: Option<HashMap<String, Option<Vec<PortBinding>>>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortBinding {
    #[serde(rename = "HostIp", default)]
    pub host_ip: String,
    #[serde(rename = "HostPort", default)]
    pub host_port: String,
}

impl ContainerInspect {
    /// Port mappings as `host_ip:host_port->container_port/proto`.
    pub fn port_mappings(&self) -> Vec<String> {
        let Some(ports) = self
            .network_settings
            .as_ref()
            .and_then(|n| n.ports.as_ref())
        else {
            return Vec::new();
        };

        let mut mappings: Vec<String> = ports
            .iter()
            .flat_map(|(container_port, bindings)| match bindings {
                Some(bindings) if !bindings.is_empty() => bindings
                    .iter()
                    .map(|b| format!("{}:{}->{}", b.host_ip, b.host_port, container_port))
                    .collect::<Vec<_>>(),
                _ => vec![container_port.clone()],
            })
            .collect();
        mappings.sort();
        mappings
    }

    pub fn into_config(self) -> ContainerConfig {
        let ports = self.port_mappings();
        ContainerConfig {
            cid: self.id,
            ports,
            status: self.state.status,
            exit_code: self.state.exit_code,
        }
    }
}

/// Subset of `GET /containers/{name}/stats?stream=false`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsResponse {
    #[serde(default)]
    pub cpu_stats: CpuStats,
    #[serde(default)]
    pub precpu_stats: CpuStats,
    #[serde(default)]
    pub memory_stats: MemoryStats,
    #[serde(default)]
    pub networks: Option<HashMap<String, NetworkStats>>,
    #[serde(default)]
    pub blkio_stats: Option<BlkioStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    #[serde(default)]
    pub system_cpu_usage: Option<u64>,
    #[serde(default)]
    pub online_cpus: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpuUsage {
    #[serde(default)]
    pub total_usage: u64,
    #[serde(default)]
    pub percpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub stats: Option<HashMap<String, u64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkStats {
    #[serde(default)]
    pub rx_bytes: u64,
    #[serde(default)]
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlkioStats {
    #[serde(default)]
    pub io_service_bytes_recursive: Option<Vec<BlkioEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlkioEntry {
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub value: u64,
}

impl StatsResponse {
    /// CPU usage percentage across all online CPUs.
    pub fn cpu_percent(&self) -> f64 {
        let cpu_delta = self
            .cpu_stats
            .cpu_usage
            .total_usage
            .saturating_sub(self.precpu_stats.cpu_usage.total_usage) as f64;
        let system_delta = self
            .cpu_stats
            .system_cpu_usage
            .unwrap_or(0)
            .saturating_sub(self.precpu_stats.system_cpu_usage.unwrap_or(0))
            as f64;

        let online = self.cpu_stats.online_cpus.map(f64::from).unwrap_or_else(|| {
            self.cpu_stats
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map(|p| p.len() as f64)
                .unwrap_or(1.0)
        });

        if cpu_delta > 0.0 && system_delta > 0.0 {
            cpu_delta / system_delta * online * 100.0
        } else {
            0.0
        }
    }

    /// Memory usage excluding page cache.
    pub fn memory_usage(&self) -> u64 {
        let cache = self
            .memory_stats
            .stats
            .as_ref()
            .and_then(|s| s.get("inactive_file").or_else(|| s.get("cache")).copied())
            .unwrap_or(0);
        self.memory_stats.usage.saturating_sub(cache)
    }

    pub fn summarize(&self) -> ContainerStats {
        let usage = self.memory_usage() as f64;
        let limit = self.memory_stats.limit as f64;
        let mem_percent = if limit > 0.0 { usage / limit * 100.0 } else { 0.0 };

        let (rx, tx) = self
            .networks
            .iter()
            .flat_map(|n| n.values())
            .fold((0u64, 0u64), |(rx, tx), n| (rx + n.rx_bytes, tx + n.tx_bytes));

        let (read, write) = self
            .blkio_stats
            .iter()
            .flat_map(|b| b.io_service_bytes_recursive.iter().flatten())
            .fold((0u64, 0u64), |(r, w), entry| {
                match entry.op.to_lowercase().as_str() {
                    "read" => (r + entry.value, w),
                    "write" => (r, w + entry.value),
                    _ => (r, w),
                }
            });

        ContainerStats {
            cpu: format!("{:.3}%", self.cpu_percent()),
            mem: human_readable_binary_unit(usage),
            mem_limit: human_readable_binary_unit(limit),
            mem_percent: format!("{mem_percent:.3}%"),
            net_input: human_readable_unit(rx as f64),
            net_output: human_readable_unit(tx as f64),
            block_input: human_readable_unit(read as f64),
            block_output: human_readable_unit(write as f64),
        }
    }
}

/// Docker Engine API client for Unix socket communication.
pub struct DockerApi {
    socket_path: String,
    client: Client<UnixConnector>,
}

impl DockerApi {
    /// Create a new client for the given socket path.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        let socket_path = socket_path.as_ref().to_string_lossy().to_string();
        Self {
            socket_path,
            client: Client::unix(),
        }
    }

    /// `GET /images/json`.
    pub async fn list_images(&self) -> Result<Vec<ImageSummary>, EngineError> {
        self.get("/images/json").await
    }

    /// `POST /images/create`, waiting for the pull to finish.
    ///
    /// The engine streams progress with a 200 status; failures show up as an
    /// `error` field in the stream.
    pub async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        let path = format!("/images/create?fromImage={}", encode_query(reference));
        let body = self.post(&path).await?;

        for line in body.lines() {
            if let Ok(progress) = serde_json::from_str::<PullProgress>(line) {
                if let Some(message) = progress.error {
                    error!(reference = %reference, message = %message, "Image pull failed");
                    return Err(EngineError::Api {
                        status: 200,
                        message,
                    });
                }
            }
        }

        debug!(reference = %reference, "Image pulled");
        Ok(())
    }

    /// `POST /images/{id}/tag`.
    pub async fn tag_image(&self, image_id: &str, reference: &str) -> Result<(), EngineError> {
        let (repo, tag) = split_repo_tag(reference);
        let mut path = format!("/images/{}/tag?repo={}", image_id, encode_query(repo));
        if let Some(tag) = tag {
            path.push_str(&format!("&tag={}", encode_query(tag)));
        }
        self.post(&path).await?;
        Ok(())
    }

    /// `GET /containers/{name}/json`.
    pub async fn inspect_container(&self, name: &str) -> Result<ContainerInspect, EngineError> {
        self.get(&format!("/containers/{}/json", encode_query(name)))
            .await
    }

    /// `GET /containers/{name}/stats?stream=false`.
    pub async fn container_stats(&self, name: &str) -> Result<StatsResponse, EngineError> {
        self.get(&format!(
            "/containers/{}/stats?stream=false",
            encode_query(name)
        ))
        .await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, EngineError> {
        let uri = Uri::new(&self.socket_path, path);

        debug!(path = path, "GET request to engine API");

        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("Accept", "application/json")
            .body(Body::empty())
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| EngineError::Connection(e.to_string()))?;
        let status = response.status();
        let body = hyper::body::aggregate(response.into_body())
            .await
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        if status.is_success() {
            Ok(serde_json::from_reader(body.reader())?)
        } else {
            Err(api_error(status.as_u16(), body.chunk()))
        }
    }

    async fn post(&self, path: &str) -> Result<String, EngineError> {
        let uri = Uri::new(&self.socket_path, path);

        debug!(path = path, "POST request to engine API");

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::empty())
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| EngineError::Connection(e.to_string()))?;
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        if status.is_success() {
            Ok(String::from_utf8_lossy(&bytes).to_string())
        } else {
            Err(api_error(status.as_u16(), &bytes))
        }
    }
}

#[derive(Debug, Deserialize)]
struct PullProgress {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

fn api_error(status: u16, body: &[u8]) -> EngineError {
    let message = serde_json::from_slice::<ApiMessage>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).to_string());

    if status == 404 {
        EngineError::NotFound(message)
    } else {
        EngineError::Api { status, message }
    }
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
fn encode_query(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}
