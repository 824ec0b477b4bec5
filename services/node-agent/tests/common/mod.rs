//! Shared fixtures for agent integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use pharos_node_agent::agent::{Agent, AgentParts};
use pharos_node_agent::anchor::AnchorClient;
use pharos_node_agent::device::SystemContainerClient;
use pharos_node_agent::engine::MockComposeDriver;
use pharos_node_agent::health::HealthConfig;
use pharos_node_agent::model::Property;
use pharos_node_agent::repository::{Repositories, NODE_ADDRESS, NODE_ID, PING_INTERVAL};
use tempfile::TempDir;

/// Single service, tagged image.
pub const TEST_YAML: &str = "services:\n  test_service:\n    image: test_url:5000/test:1.0\nversion: \"2\"\n";

/// Same app as [`TEST_YAML`] with an untagged image.
pub const UNTAGGED_YAML: &str = "services:\n  test_service:\n    image: test_url:5000/test\nversion: \"2\"\n";

/// Id of every descriptor above.
pub const TEST_APP_ID: &str = "2c4084a992d20c0286edc0b39d444104e1913024";

pub struct TestAgent {
    pub agent: Arc<Agent>,
    pub driver: Arc<MockComposeDriver>,
    pub repos: Repositories,
    _dir: TempDir,
}

/// Agent over a mock engine and in-memory repositories.
pub fn test_agent(anchor_base_url: &str) -> TestAgent {
    test_agent_with(Repositories::in_memory().unwrap(), anchor_base_url)
}

/// Agent over the given repositories, e.g. to simulate a restart.
pub fn test_agent_with(repos: Repositories, anchor_base_url: &str) -> TestAgent {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(MockComposeDriver::new());

    let agent = Agent::new(AgentParts {
        repos: repos.clone(),
        driver: driver.clone(),
        anchor: AnchorClient::with_base_url(anchor_base_url).unwrap(),
        device: SystemContainerClient::with_address("127.0.0.1:9").unwrap(),
        compose_dir: dir.path().join("compose"),
        data_dir: dir.path().to_path_buf(),
        health: HealthConfig {
            interval_unit: Duration::from_millis(50),
        },
    });

    TestAgent {
        agent: Arc::new(agent),
        driver,
        repos,
        _dir: dir,
    }
}

/// Node address, node id and a one-unit ping interval.
pub fn seed_registration(repos: &Repositories, node_id: &str) {
    for property in [
        Property::new(NODE_ADDRESS, "10.0.0.9", true),
        Property::new(NODE_ID, node_id, true),
        Property::new("os", "linux", true),
        Property::new(PING_INTERVAL, "1", false),
    ] {
        repos.config.set_property(&property).unwrap();
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
