//! `docker compose` backed driver.
//!
//! Project-level verbs shell out to the compose CLI with the app id as
//! project name. Image and container queries go straight to the Engine API
//! through [`DockerApi`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use pharos_id::AppId;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::docker::{find_digest_by_name, find_id_by_repo_digest, DockerApi};
use super::{
    ComposeDriver, ContainerConfig, ContainerStats, EngineError, EventSink, PsRecord,
};
use crate::model::{Event, STATUS_CREATED, STATUS_STARTED};

/// Time allowed for `compose events` to attach before `up` runs.
const EVENT_ATTACH_GRACE: Duration = Duration::from_millis(300);

/// Time allowed for trailing engine events after `up` returns.
const EVENT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DockerComposeConfig {
    /// `docker` (compose plugin) or a standalone `docker-compose` binary.
    pub compose_bin: PathBuf,
    /// Docker daemon socket.
    pub socket: PathBuf,
}

impl Default for DockerComposeConfig {
    fn default() -> Self {
        Self {
            compose_bin: PathBuf::from("docker"),
            socket: PathBuf::from("/var/run/docker.sock"),
        }
    }
}

/// Running `compose events` stream for one app.
struct EventsSubscription {
    stop: oneshot::Sender<()>,
    task: JoinHandle<HashSet<String>>,
}

/// Compose driver over the docker CLI and Engine API.
pub struct DockerCompose {
    config: DockerComposeConfig,
    api: DockerApi,
    subscriptions: Mutex<HashMap<String, EventsSubscription>>,
}

impl DockerCompose {
    pub fn new(config: DockerComposeConfig) -> Self {
        let api = DockerApi::new(&config.socket);
        Self {
            config,
            api,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    fn uses_plugin(&self) -> bool {
        self.config
            .compose_bin
            .file_name()
            .map(|name| name != "docker-compose")
            .unwrap_or(true)
    }

    /// Arguments shared by every project verb.
    fn base_args(&self, app_id: &AppId, file: &Path) -> Vec<String> {
        let mut args = Vec::with_capacity(5);
        if self.uses_plugin() {
            args.push("compose".to_string());
        }
        args.push("-p".to_string());
        args.push(app_id.to_string());
        args.push("-f".to_string());
        args.push(file.to_string_lossy().to_string());
        args
    }

    fn command(&self, app_id: &AppId, file: &Path) -> Command {
        let mut cmd = Command::new(&self.config.compose_bin);
        cmd.args(self.base_args(app_id, file))
            .env(
                "DOCKER_HOST",
                format!("unix://{}", self.config.socket.display()),
            )
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Run a project verb to completion and return its stdout.
    async fn run(
        &self,
        app_id: &AppId,
        file: &Path,
        verb: &str,
        args: &[String],
    ) -> Result<String, EngineError> {
        debug!(app_id = %app_id, verb = verb, args = ?args, "Running compose command");

        let output = self
            .command(app_id, file)
            .arg(verb)
            .args(args)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(app_id = %app_id, verb = verb, stderr = %stderr, "Compose command failed");
            return Err(EngineError::Command {
                verb: verb.to_string(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Services declared by the compose file.
    async fn config_services(&self, app_id: &AppId, file: &Path) -> Result<Vec<String>, EngineError> {
        let stdout = self
            .run(app_id, file, "config", &["--services".to_string()])
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Spawn `compose events --json` and forward classified events to `sink`
    /// until `stop` fires, the stream ends or the sink is closed.
    /// Report services the event stream missed, resolving their container
    /// ids through `ps`.
    async fn backfill_started(
        &self,
        app_id: &AppId,
        file: &Path,
        event_id: &str,
        sink: &EventSink,
        services: &[String],
    ) {
        let records = match self.ps(app_id, file, services).await {
            Ok(records) => records,
            Err(e) => {
                warn!(app_id = %app_id, error = %e, "Could not resolve missed start events");
                return;
            }
        };
        for event in missed_start_events(app_id.as_str(), &records, services, event_id) {
            if sink.send(event).await.is_err() {
                debug!(app_id = %app_id, "Event sink closed during backfill");
                return;
            }
        }
    }

    fn spawn_events(
        &self,
        app_id: &AppId,
        file: &Path,
        event_id: Option<String>,
        sink: EventSink,
        mut stop: oneshot::Receiver<()>,
    ) -> Result<JoinHandle<HashSet<String>>, EngineError> {
        let mut child = self
            .command(app_id, file)
            .args(["events", "--json"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| EngineError::Command {
            verb: "events".to_string(),
            stderr: "event stream has no stdout".to_string(),
        })?;

        let app = app_id.to_string();
        Ok(tokio::spawn(async move {
            let mut started = HashSet::new();
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let Some(event) = parse_event_line(&app, &line) else {
                                continue;
                            };
                            let event = match &event_id {
                                Some(id) => event.with_id(id),
                                None => event,
                            };
                            if event.status == STATUS_STARTED {
                                started.insert(event.service_name.clone());
                            }
                            if sink.send(event).await.is_err() {
                                debug!(app_id = %app, "Event sink closed");
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!(app_id = %app, "Event stream ended");
                            break;
                        }
                        Err(e) => {
                            warn!(app_id = %app, error = %e, "Failed to read event stream");
                            break;
                        }
                    }
                }
            }

            if let Err(e) = child.kill().await {
                debug!(app_id = %app, error = %e, "Event stream already exited");
            }
            started
        }))
    }
}

/// One line of `compose events --json`.
#[derive(Debug, Deserialize)]
struct ComposeEvent {
    #[serde(default)]
    service: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    id: String,
}

fn parse_event_line(app_id: &str, line: &str) -> Option<Event> {
    let raw: ComposeEvent = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(app_id = %app_id, error = %e, "Skipping unparsable engine event");
            return None;
        }
    };
    if raw.action.is_empty() {
        return None;
    }
    Some(classify_event(app_id, &raw.service, &raw.action, &raw.id))
}

/// Maps an engine action to a pipeline event.
///
/// Unknown actions are forwarded as container events with the raw action as
/// status.
pub fn classify_event(app_id: &str, service: &str, action: &str, cid: &str) -> Event {
    let cid = (!cid.is_empty()).then(|| cid.to_string());
    match action {
        "pull" => Event::image_pulled(app_id, service),
        "create" => Event::container(app_id, service, STATUS_CREATED, cid),
        "start" => Event::container(app_id, service, STATUS_STARTED, cid),
        other => Event::container(app_id, service, other, cid),
    }
}

/// Created and started events for running containers of `services`.
fn missed_start_events(
    app_id: &str,
    records: &[PsRecord],
    services: &[String],
    event_id: &str,
) -> Vec<Event> {
    records
        .iter()
        .filter(|r| r.state == "running" && services.contains(&r.service))
        .flat_map(|r| {
            let cid = (!r.id.is_empty()).then(|| r.id.clone());
            [STATUS_CREATED, STATUS_STARTED].map(|status| {
                Event::container(app_id, &r.service, status, cid.clone()).with_id(event_id)
            })
        })
        .collect()
}

/// Parses `ps --format json`, which is a JSON array on older compose
/// releases and one object per line on newer ones.
fn parse_ps_output(stdout: &str) -> Result<Vec<PsRecord>, EngineError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    trimmed
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(Into::into))
        .collect()
}

fn with_services(mut args: Vec<String>, services: &[String]) -> Vec<String> {
    args.extend(services.iter().cloned());
    args
}

#[async_trait]
impl ComposeDriver for DockerCompose {
    async fn create(&self, app_id: &AppId, file: &Path) -> Result<(), EngineError> {
        self.run(app_id, file, "create", &[]).await.map(|_| ())
    }

    async fn up(
        &self,
        app_id: &AppId,
        file: &Path,
        force_recreate: bool,
        services: &[String],
    ) -> Result<(), EngineError> {
        let mut args = vec!["-d".to_string()];
        if force_recreate {
            args.push("--force-recreate".to_string());
        }
        self.run(app_id, file, "up", &with_services(args, services))
            .await?;
        info!(app_id = %app_id, force_recreate, "Compose up");
        Ok(())
    }

    async fn down(&self, app_id: &AppId, file: &Path) -> Result<(), EngineError> {
        self.run(app_id, file, "down", &[]).await?;
        info!(app_id = %app_id, "Compose down");
        Ok(())
    }

    async fn down_with_remove_images(&self, app_id: &AppId, file: &Path) -> Result<(), EngineError> {
        self.run(
            app_id,
            file,
            "down",
            &["--rmi".to_string(), "all".to_string()],
        )
        .await?;
        info!(app_id = %app_id, "Compose down with image removal");
        Ok(())
    }

    async fn start(&self, app_id: &AppId, file: &Path) -> Result<(), EngineError> {
        self.run(app_id, file, "start", &[]).await.map(|_| ())
    }

    async fn stop(&self, app_id: &AppId, file: &Path) -> Result<(), EngineError> {
        self.run(app_id, file, "stop", &[]).await.map(|_| ())
    }

    async fn pause(&self, app_id: &AppId, file: &Path) -> Result<(), EngineError> {
        self.run(app_id, file, "pause", &[]).await.map(|_| ())
    }

    async fn unpause(&self, app_id: &AppId, file: &Path) -> Result<(), EngineError> {
        self.run(app_id, file, "unpause", &[]).await.map(|_| ())
    }

    async fn pull(&self, app_id: &AppId, file: &Path, services: &[String]) -> Result<(), EngineError> {
        self.run(app_id, file, "pull", &with_services(Vec::new(), services))
            .await
            .map(|_| ())
    }

    async fn ps(
        &self,
        app_id: &AppId,
        file: &Path,
        services: &[String],
    ) -> Result<Vec<PsRecord>, EngineError> {
        let args = with_services(
            vec!["-a".to_string(), "--format".to_string(), "json".to_string()],
            services,
        );
        let stdout = self.run(app_id, file, "ps", &args).await?;
        parse_ps_output(&stdout)
    }

    async fn up_with_event(
        &self,
        app_id: &AppId,
        file: &Path,
        event_id: &str,
        sink: EventSink,
        services: &[String],
    ) -> Result<(), EngineError> {
        let services = if services.is_empty() {
            self.config_services(app_id, file).await?
        } else {
            services.to_vec()
        };

        for service in &services {
            self.run(app_id, file, "pull", std::slice::from_ref(service))
                .await?;
            let event = Event::image_pulled(app_id.as_str(), service).with_id(event_id);
            if sink.send(event).await.is_err() {
                debug!(app_id = %app_id, "Event sink closed during pull");
            }
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let forward = self.spawn_events(
            app_id,
            file,
            Some(event_id.to_string()),
            sink.clone(),
            stop_rx,
        )?;
        tokio::time::sleep(EVENT_ATTACH_GRACE).await;

        let result = self.up(app_id, file, true, &services).await;

        if result.is_ok() {
            tokio::time::sleep(EVENT_DRAIN_GRACE).await;
        }
        let _ = stop_tx.send(());
        let started = match forward.await {
            Ok(started) => started,
            Err(e) => {
                warn!(app_id = %app_id, error = %e, "Event forwarding task failed");
                HashSet::new()
            }
        };

        if result.is_ok() {
            let missed: Vec<String> = services
                .iter()
                .filter(|s| !started.contains(*s))
                .cloned()
                .collect();
            if !missed.is_empty() {
                self.backfill_started(app_id, file, event_id, &sink, &missed)
                    .await;
            }
        }

        result
    }

    async fn events(
        &self,
        app_id: &AppId,
        file: &Path,
        sink: Option<EventSink>,
    ) -> Result<(), EngineError> {
        let key = app_id.to_string();
        let mut subscriptions = self.subscriptions.lock().await;

        match sink {
            Some(sink) => {
                if subscriptions.contains_key(&key) {
                    debug!(app_id = %app_id, "Event stream already open");
                    return Ok(());
                }
                let (stop, stop_rx) = oneshot::channel();
                let task = self.spawn_events(app_id, file, None, sink, stop_rx)?;
                subscriptions.insert(key, EventsSubscription { stop, task });
                info!(app_id = %app_id, "Event stream opened");
            }
            None => {
                let Some(subscription) = subscriptions.remove(&key) else {
                    return Ok(());
                };
                drop(subscriptions);

                let _ = subscription.stop.send(());
                if let Err(e) = subscription.task.await {
                    warn!(app_id = %app_id, error = %e, "Event stream task failed");
                }
                info!(app_id = %app_id, "Event stream closed");
            }
        }

        Ok(())
    }

    async fn image_pull(&self, reference: &str) -> Result<(), EngineError> {
        self.api.pull_image(reference).await
    }

    async fn image_tag(&self, image_id: &str, reference: &str) -> Result<(), EngineError> {
        self.api.tag_image(image_id, reference).await?;
        info!(image_id = %image_id, reference = %reference, "Image tagged");
        Ok(())
    }

    async fn get_image_digest_by_name(&self, name: &str) -> Result<String, EngineError> {
        let images = self.api.list_images().await?;
        find_digest_by_name(&images, name)
            .ok_or_else(|| EngineError::NotFound(format!("no repo digest for image {name}")))
    }

    async fn get_image_id_by_repo_digest(&self, digest: &str) -> Result<String, EngineError> {
        let images = self.api.list_images().await?;
        find_id_by_repo_digest(&images, digest)
            .ok_or_else(|| EngineError::NotFound(format!("no untagged image for {digest}")))
    }

    async fn get_container_config_by_name(
        &self,
        name: &str,
    ) -> Result<ContainerConfig, EngineError> {
        Ok(self.api.inspect_container(name).await?.into_config())
    }

    async fn container_stats(&self, name: &str) -> Result<ContainerStats, EngineError> {
        Ok(self.api.container_stats(name).await?.summarize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventType;
    use rstest::rstest;

    fn app_id() -> AppId {
        AppId::parse("2c4084a992d20c0286edc0b39d444104e1913024").unwrap()
    }

    #[rstest]
    #[case("pull", EventType::Image, "pulled")]
    #[case("create", EventType::Container, "created")]
    #[case("start", EventType::Container, "started")]
    #[case("die", EventType::Container, "die")]
    #[case("health_status: healthy", EventType::Container, "health_status: healthy")]
    fn test_classify_event(#[case] action: &str, #[case] kind: EventType, #[case] status: &str) {
        let event = classify_event("app", "web", action, "cid1");
        assert_eq!(event.kind, kind);
        assert_eq!(event.status, status);
        assert_eq!(event.app_id, "app");
        assert_eq!(event.service_name, "web");
        assert!(event.id.is_none());
    }

    #[test]
    fn test_classify_event_empty_cid() {
        let event = classify_event("app", "web", "start", "");
        assert!(event.cid.is_none());
    }

    #[test]
    fn test_parse_event_line() {
        let line = r#"{"time":"2024-01-01T00:00:00Z","type":"container","action":"start","id":"abc","service":"web","attributes":{}}"#;
        let event = parse_event_line("app", line).unwrap();
        assert_eq!(event.status, STATUS_STARTED);
        assert_eq!(event.cid.as_deref(), Some("abc"));

        assert!(parse_event_line("app", "not json").is_none());
        assert!(parse_event_line("app", r#"{"service":"web"}"#).is_none());
    }

    #[test]
    fn test_parse_ps_output_lines() {
        let stdout = concat!(
            r#"{"Name":"app_web_1","ID":"c1","State":"running","Service":"web","Ports":"0.0.0.0:80->80/tcp"}"#,
            "\n",
            r#"{"Name":"app_db_1","ID":"c2","State":"exited","Service":"db"}"#,
            "\n"
        );
        let records = parse_ps_output(stdout).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "app_web_1");
        assert_eq!(records[1].state, "exited");
        assert!(records[1].ports.is_empty());
    }

    #[test]
    fn test_parse_ps_output_array() {
        let stdout = r#"[{"Name":"app_web_1","Id":"c1","State":"running","Service":"web"}]"#;
        let records = parse_ps_output(stdout).unwrap();
        assert_eq!(records[0].id, "c1");
        assert!(parse_ps_output("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_missed_start_events_from_ps() {
        let records = parse_ps_output(concat!(
            r#"{"Name":"app_web_1","ID":"c1","State":"running","Service":"web"}"#,
            "\n",
            r#"{"Name":"app_db_1","ID":"c2","State":"exited","Service":"db"}"#,
            "\n",
            r#"{"Name":"app_cache_1","ID":"c3","State":"running","Service":"cache"}"#,
        ))
        .unwrap();
        let missed = vec!["web".to_string(), "db".to_string()];

        let events = missed_start_events("app", &records, &missed, "evt-1");

        let statuses: Vec<_> = events.iter().map(|e| e.status.as_str()).collect();
        assert_eq!(statuses, vec![STATUS_CREATED, STATUS_STARTED]);
        for event in &events {
            assert_eq!(event.service_name, "web");
            assert_eq!(event.cid.as_deref(), Some("c1"));
            assert_eq!(event.id.as_deref(), Some("evt-1"));
        }
    }

    #[test]
    fn test_base_args_plugin() {
        let driver = DockerCompose::new(DockerComposeConfig::default());
        let file = Path::new("/data/compose/x/docker-compose.yml");
        assert_eq!(
            driver.base_args(&app_id(), file),
            vec![
                "compose",
                "-p",
                "2c4084a992d20c0286edc0b39d444104e1913024",
                "-f",
                "/data/compose/x/docker-compose.yml"
            ]
        );
    }

    #[test]
    fn test_base_args_standalone() {
        let driver = DockerCompose::new(DockerComposeConfig {
            compose_bin: PathBuf::from("/usr/local/bin/docker-compose"),
            ..Default::default()
        });
        let args = driver.base_args(&app_id(), Path::new("f.yml"));
        assert_eq!(args[0], "-p");
    }

    #[tokio::test]
    async fn test_unsubscribe_without_stream_is_noop() {
        let driver = DockerCompose::new(DockerComposeConfig::default());
        driver
            .events(&app_id(), Path::new("f.yml"), None)
            .await
            .unwrap();
    }
}
