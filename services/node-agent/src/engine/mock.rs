//! Recording compose driver for tests and development.
//!
//! Every call is appended to a log that tests inspect with [`MockComposeDriver::calls`].
//! Failures are injected per operation with [`MockComposeDriver::fail_on`] or
//! [`MockComposeDriver::fail_once`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use pharos_id::{strip_tag, AppId};
use tracing::{debug, info};

use super::{ComposeDriver, ContainerConfig, ContainerStats, EngineError, EventSink, PsRecord};
use crate::descriptor;
use crate::model::{Event, STATUS_CREATED, STATUS_STARTED};

/// Operation kind, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    Create,
    Up,
    Down,
    DownWithRemoveImages,
    Start,
    Stop,
    Pause,
    Unpause,
    Pull,
    Ps,
    UpWithEvent,
    Events,
    ImagePull,
    ImageTag,
    GetImageDigestByName,
    GetImageIdByRepoDigest,
    GetContainerConfigByName,
    ContainerStats,
}

/// A recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Create { app_id: String },
    Up { app_id: String, force_recreate: bool, services: Vec<String> },
    Down { app_id: String },
    DownWithRemoveImages { app_id: String },
    Start { app_id: String },
    Stop { app_id: String },
    Pause { app_id: String },
    Unpause { app_id: String },
    Pull { app_id: String, services: Vec<String> },
    Ps { app_id: String },
    UpWithEvent { app_id: String, event_id: String, services: Vec<String> },
    Events { app_id: String, subscribe: bool },
    ImagePull { reference: String },
    ImageTag { image_id: String, reference: String },
    GetImageDigestByName { name: String },
    GetImageIdByRepoDigest { digest: String },
    GetContainerConfigByName { name: String },
    ContainerStats { name: String },
}

impl EngineCall {
    pub fn op(&self) -> EngineOp {
        match self {
            Self::Create { .. } => EngineOp::Create,
            Self::Up { .. } => EngineOp::Up,
            Self::Down { .. } => EngineOp::Down,
            Self::DownWithRemoveImages { .. } => EngineOp::DownWithRemoveImages,
            Self::Start { .. } => EngineOp::Start,
            Self::Stop { .. } => EngineOp::Stop,
            Self::Pause { .. } => EngineOp::Pause,
            Self::Unpause { .. } => EngineOp::Unpause,
            Self::Pull { .. } => EngineOp::Pull,
            Self::Ps { .. } => EngineOp::Ps,
            Self::UpWithEvent { .. } => EngineOp::UpWithEvent,
            Self::Events { .. } => EngineOp::Events,
            Self::ImagePull { .. } => EngineOp::ImagePull,
            Self::ImageTag { .. } => EngineOp::ImageTag,
            Self::GetImageDigestByName { .. } => EngineOp::GetImageDigestByName,
            Self::GetImageIdByRepoDigest { .. } => EngineOp::GetImageIdByRepoDigest,
            Self::GetContainerConfigByName { .. } => EngineOp::GetContainerConfigByName,
            Self::ContainerStats { .. } => EngineOp::ContainerStats,
        }
    }
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    message: String,
    once: bool,
}

#[derive(Default)]
struct MockState {
    calls: Vec<EngineCall>,
    failures: HashMap<EngineOp, InjectedFailure>,
    /// Container state per app id, as `ps` reports it.
    app_states: HashMap<String, &'static str>,
    sinks: HashMap<String, EventSink>,
}

/// Mock compose driver.
#[derive(Default)]
pub struct MockComposeDriver {
    state: Mutex<MockState>,
}

impl MockComposeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail every subsequent call of `op` with `message` as engine stderr.
    pub fn fail_on(&self, op: EngineOp, message: &str) {
        self.state().failures.insert(
            op,
            InjectedFailure {
                message: message.to_string(),
                once: false,
            },
        );
    }

    /// Fail only the next call of `op`.
    pub fn fail_once(&self, op: EngineOp, message: &str) {
        self.state().failures.insert(
            op,
            InjectedFailure {
                message: message.to_string(),
                once: true,
            },
        );
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    /// Number of calls of `op` so far.
    pub fn count(&self, op: EngineOp) -> usize {
        self.state().calls.iter().filter(|c| c.op() == op).count()
    }

    pub fn reset_calls(&self) {
        self.state().calls.clear();
    }

    /// Returns true if an event stream is open for the app.
    pub fn is_subscribed(&self, app_id: &str) -> bool {
        self.state().sinks.contains_key(app_id)
    }

    /// Container state `ps` would report for the app.
    pub fn app_state(&self, app_id: &str) -> Option<&'static str> {
        self.state().app_states.get(app_id).copied()
    }

    /// Push an event through the app's open stream, as the engine would.
    ///
    /// Returns false if no stream is open.
    pub async fn emit(&self, event: Event) -> bool {
        let sink = self.state().sinks.get(&event.app_id).cloned();
        match sink {
            Some(sink) => sink.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Record a call and apply any injected failure for it.
    fn record(&self, call: EngineCall) -> Result<(), EngineError> {
        let op = call.op();
        debug!(call = ?call, "[MOCK] Engine call");

        let mut state = self.state();
        state.calls.push(call);

        let Some(failure) = state.failures.get(&op).cloned() else {
            return Ok(());
        };
        if failure.once {
            state.failures.remove(&op);
        }
        Err(EngineError::Command {
            verb: format!("{op:?}").to_lowercase(),
            stderr: failure.message,
        })
    }

    fn set_app_state(&self, app_id: &AppId, state: &'static str) {
        self.state().app_states.insert(app_id.to_string(), state);
    }

    /// Services of the compose file on disk, empty if unreadable.
    async fn file_services(file: &Path) -> Vec<String> {
        let Ok(yaml) = tokio::fs::read_to_string(file).await else {
            return Vec::new();
        };
        descriptor::yaml_to_json(&yaml)
            .and_then(|json| descriptor::service_names(&json))
            .unwrap_or_default()
    }

    async fn resolve_services(file: &Path, services: &[String]) -> Vec<String> {
        if services.is_empty() {
            Self::file_services(file).await
        } else {
            services.to_vec()
        }
    }
}

fn container_name(app_id: &str, service: &str) -> String {
    format!("{app_id}_{service}_1")
}

#[async_trait]
impl ComposeDriver for MockComposeDriver {
    async fn create(&self, app_id: &AppId, _file: &Path) -> Result<(), EngineError> {
        self.record(EngineCall::Create {
            app_id: app_id.to_string(),
        })?;
        self.set_app_state(app_id, "created");
        Ok(())
    }

    async fn up(
        &self,
        app_id: &AppId,
        _file: &Path,
        force_recreate: bool,
        services: &[String],
    ) -> Result<(), EngineError> {
        self.record(EngineCall::Up {
            app_id: app_id.to_string(),
            force_recreate,
            services: services.to_vec(),
        })?;
        info!(app_id = %app_id, force_recreate, "[MOCK] Compose up");
        self.set_app_state(app_id, "running");
        Ok(())
    }

    async fn down(&self, app_id: &AppId, _file: &Path) -> Result<(), EngineError> {
        self.record(EngineCall::Down {
            app_id: app_id.to_string(),
        })?;
        self.state().app_states.remove(app_id.as_str());
        Ok(())
    }

    async fn down_with_remove_images(&self, app_id: &AppId, _file: &Path) -> Result<(), EngineError> {
        self.record(EngineCall::DownWithRemoveImages {
            app_id: app_id.to_string(),
        })?;
        self.state().app_states.remove(app_id.as_str());
        Ok(())
    }

    async fn start(&self, app_id: &AppId, _file: &Path) -> Result<(), EngineError> {
        self.record(EngineCall::Start {
            app_id: app_id.to_string(),
        })?;
        self.set_app_state(app_id, "running");
        Ok(())
    }

    async fn stop(&self, app_id: &AppId, _file: &Path) -> Result<(), EngineError> {
        self.record(EngineCall::Stop {
            app_id: app_id.to_string(),
        })?;
        self.set_app_state(app_id, "exited");
        Ok(())
    }

    async fn pause(&self, app_id: &AppId, _file: &Path) -> Result<(), EngineError> {
        self.record(EngineCall::Pause {
            app_id: app_id.to_string(),
        })?;
        self.set_app_state(app_id, "paused");
        Ok(())
    }

    async fn unpause(&self, app_id: &AppId, _file: &Path) -> Result<(), EngineError> {
        self.record(EngineCall::Unpause {
            app_id: app_id.to_string(),
        })?;
        self.set_app_state(app_id, "running");
        Ok(())
    }

    async fn pull(&self, app_id: &AppId, _file: &Path, services: &[String]) -> Result<(), EngineError> {
        self.record(EngineCall::Pull {
            app_id: app_id.to_string(),
            services: services.to_vec(),
        })
    }

    async fn ps(
        &self,
        app_id: &AppId,
        file: &Path,
        services: &[String],
    ) -> Result<Vec<PsRecord>, EngineError> {
        self.record(EngineCall::Ps {
            app_id: app_id.to_string(),
        })?;

        let Some(state) = self.app_state(app_id.as_str()) else {
            return Ok(Vec::new());
        };

        Ok(Self::resolve_services(file, services)
            .await
            .into_iter()
            .map(|service| {
                let name = container_name(app_id.as_str(), &service);
                PsRecord {
                    id: format!("cid-{name}"),
                    name,
                    ports: String::new(),
                    state: state.to_string(),
                    command: String::new(),
                    service,
                }
            })
            .collect())
    }

    async fn up_with_event(
        &self,
        app_id: &AppId,
        file: &Path,
        event_id: &str,
        sink: EventSink,
        services: &[String],
    ) -> Result<(), EngineError> {
        self.record(EngineCall::UpWithEvent {
            app_id: app_id.to_string(),
            event_id: event_id.to_string(),
            services: services.to_vec(),
        })?;

        for service in Self::resolve_services(file, services).await {
            let cid = Some(format!("cid-{}", container_name(app_id.as_str(), &service)));
            let events = [
                Event::image_pulled(app_id.as_str(), &service),
                Event::container(app_id.as_str(), &service, STATUS_CREATED, cid.clone()),
                Event::container(app_id.as_str(), &service, STATUS_STARTED, cid),
            ];
            for event in events {
                if sink.send(event.with_id(event_id)).await.is_err() {
                    break;
                }
            }
        }

        self.set_app_state(app_id, "running");
        Ok(())
    }

    async fn events(
        &self,
        app_id: &AppId,
        _file: &Path,
        sink: Option<EventSink>,
    ) -> Result<(), EngineError> {
        self.record(EngineCall::Events {
            app_id: app_id.to_string(),
            subscribe: sink.is_some(),
        })?;

        let mut state = self.state();
        match sink {
            Some(sink) => {
                state.sinks.entry(app_id.to_string()).or_insert(sink);
            }
            None => {
                state.sinks.remove(app_id.as_str());
            }
        }
        Ok(())
    }

    async fn image_pull(&self, reference: &str) -> Result<(), EngineError> {
        self.record(EngineCall::ImagePull {
            reference: reference.to_string(),
        })
    }

    async fn image_tag(&self, image_id: &str, reference: &str) -> Result<(), EngineError> {
        self.record(EngineCall::ImageTag {
            image_id: image_id.to_string(),
            reference: reference.to_string(),
        })
    }

    async fn get_image_digest_by_name(&self, name: &str) -> Result<String, EngineError> {
        self.record(EngineCall::GetImageDigestByName {
            name: name.to_string(),
        })?;
        Ok(format!("{}@sha256:mock", strip_tag(name)))
    }

    async fn get_image_id_by_repo_digest(&self, digest: &str) -> Result<String, EngineError> {
        self.record(EngineCall::GetImageIdByRepoDigest {
            digest: digest.to_string(),
        })?;
        Ok("sha256:mockid".to_string())
    }

    async fn get_container_config_by_name(
        &self,
        name: &str,
    ) -> Result<ContainerConfig, EngineError> {
        self.record(EngineCall::GetContainerConfigByName {
            name: name.to_string(),
        })?;
        Ok(ContainerConfig {
            cid: format!("cid-{name}"),
            ports: Vec::new(),
            status: "running".to_string(),
            exit_code: 0,
        })
    }

    async fn container_stats(&self, name: &str) -> Result<ContainerStats, EngineError> {
        self.record(EngineCall::ContainerStats {
            name: name.to_string(),
        })?;
        Ok(ContainerStats {
            cpu: "0.000%".to_string(),
            mem: "0.000B".to_string(),
            mem_limit: "0.000B".to_string(),
            mem_percent: "0.000%".to_string(),
            net_input: "0.000B".to_string(),
            net_output: "0.000B".to_string(),
            block_input: "0.000B".to_string(),
            block_output: "0.000B".to_string(),
        })
    }
}
