//! State shared across request handlers.

use std::sync::Arc;

use crate::agent::Agent;
use crate::controller::DeploymentController;

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    agent: Arc<Agent>,
}

impl ApiState {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self { agent }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn controller(&self) -> &DeploymentController {
        &self.agent.controller
    }
}
