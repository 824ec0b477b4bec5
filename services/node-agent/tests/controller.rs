//! Deployment controller flows over the mock engine.

mod common;

use common::{test_agent, test_agent_with, TEST_APP_ID, TEST_YAML, UNTAGGED_YAML};
use pharos_id::AppId;
use pharos_node_agent::controller::{DeployQuery, RegistryNotification, UpdateQuery};
use pharos_node_agent::engine::{EngineCall, EngineOp};
use pharos_node_agent::model::{AppState, ChangeStatus};
use pharos_node_agent::AgentError;

const NO_ANCHOR: &str = "http://127.0.0.1:9/api/v1";

fn app_id() -> AppId {
    AppId::parse(TEST_APP_ID).unwrap()
}

#[tokio::test]
async fn test_deploy_runs_app() {
    let t = test_agent(NO_ANCHOR);

    let detail = t
        .agent
        .controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap();

    assert_eq!(detail.app.id.as_str(), TEST_APP_ID);
    assert_eq!(detail.app.state, AppState::Running);
    assert_eq!(detail.app.images.len(), 1);
    assert_eq!(detail.app.images[0].name, "test_url:5000/test");
    assert_eq!(detail.services.len(), 1);
    assert_eq!(detail.services[0].name, "test_service");
    assert_eq!(detail.services[0].state.status, "running");

    assert!(t.driver.is_subscribed(TEST_APP_ID));
    assert!(t.agent.monitor.is_enabled(&app_id()).await);
    assert!(t.driver.calls().contains(&EngineCall::Up {
        app_id: TEST_APP_ID.to_string(),
        force_recreate: true,
        services: vec![],
    }));
}

#[tokio::test]
async fn test_deploy_twice_is_idempotent() {
    let t = test_agent(NO_ANCHOR);
    let controller = &t.agent.controller;

    let first = controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap();
    let second = controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap();

    assert_eq!(first.app, second.app);
    assert_eq!(t.driver.count(EngineOp::Up), 1);
    assert_eq!(t.driver.count(EngineOp::Pull), 0);
    assert_eq!(t.driver.count(EngineOp::UpWithEvent), 0);
}

#[tokio::test]
async fn test_failed_deploy_leaves_nothing_behind() {
    let t = test_agent(NO_ANCHOR);
    t.driver
        .fail_on(EngineOp::Up, "Bind for 0.0.0.0:80 failed: port is already allocated");

    let err = t
        .agent
        .controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::AlreadyAllocatedPort(_)));
    assert_eq!(t.driver.count(EngineOp::DownWithRemoveImages), 1);
    assert!(!t.driver.is_subscribed(TEST_APP_ID));
    assert!(t.agent.controller.list_apps().unwrap().is_empty());
}

#[tokio::test]
async fn test_start_and_stop() {
    let t = test_agent(NO_ANCHOR);
    let controller = &t.agent.controller;
    controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap();

    let err = controller.start_app(&app_id()).await.unwrap_err();
    assert!(matches!(err, AgentError::AlreadyReported(_)));

    controller.stop_app(&app_id()).await.unwrap();
    assert_eq!(controller.app_state(&app_id()).unwrap(), AppState::Exited);
    assert_eq!(t.driver.app_state(TEST_APP_ID), Some("exited"));

    let err = controller.stop_app(&app_id()).await.unwrap_err();
    assert!(matches!(err, AgentError::AlreadyReported(_)));

    controller.start_app(&app_id()).await.unwrap();
    assert_eq!(controller.app_state(&app_id()).unwrap(), AppState::Running);
    assert_eq!(t.driver.app_state(TEST_APP_ID), Some("running"));
}

#[tokio::test]
async fn test_deploy_rolls_back_when_events_cannot_be_enabled() {
    let t = test_agent(NO_ANCHOR);
    t.driver
        .fail_once(EngineOp::Events, "Cannot connect to the Docker daemon");

    assert!(t
        .agent
        .controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .is_err());

    assert_eq!(t.driver.count(EngineOp::Up), 0);
    assert_eq!(t.driver.count(EngineOp::DownWithRemoveImages), 0);
    assert!(!t.agent.monitor.is_enabled(&app_id()).await);
    assert!(t.agent.controller.list_apps().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_start_stops_app() {
    let t = test_agent(NO_ANCHOR);
    let controller = &t.agent.controller;
    controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap();
    controller.stop_app(&app_id()).await.unwrap();
    t.driver.reset_calls();
    t.driver.fail_once(EngineOp::Start, "container failed to start");

    assert!(controller.start_app(&app_id()).await.is_err());

    assert_eq!(
        t.driver.calls(),
        vec![
            EngineCall::Start {
                app_id: TEST_APP_ID.to_string(),
            },
            EngineCall::Stop {
                app_id: TEST_APP_ID.to_string(),
            },
        ]
    );
    assert_eq!(controller.app_state(&app_id()).unwrap(), AppState::Exited);
}

#[tokio::test]
async fn test_failed_stop_brings_app_back() {
    let t = test_agent(NO_ANCHOR);
    let controller = &t.agent.controller;
    controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap();
    t.driver.reset_calls();
    t.driver.fail_once(EngineOp::Stop, "timeout stopping container");

    assert!(controller.stop_app(&app_id()).await.is_err());

    assert_eq!(controller.app_state(&app_id()).unwrap(), AppState::Running);
    assert_eq!(
        t.driver.calls().last(),
        Some(&EngineCall::Up {
            app_id: TEST_APP_ID.to_string(),
            force_recreate: false,
            services: vec![],
        })
    );
}

#[tokio::test]
async fn test_update_rolls_back_on_up_failure() {
    let t = test_agent(NO_ANCHOR);
    let controller = &t.agent.controller;
    controller
        .deploy_app(UNTAGGED_YAML, DeployQuery::default())
        .await
        .unwrap();
    t.driver.reset_calls();
    t.driver.fail_once(EngineOp::Up, "manifest for test_url:5000/test:2.0 not found");

    let query = UpdateQuery {
        images: vec!["test_url:5000/test:2.0".to_string()],
        eventid: None,
    };
    assert!(controller.update_app(&app_id(), query).await.is_err());

    let calls = t.driver.calls();
    let position = |wanted: &EngineCall| calls.iter().position(|c| c == wanted);

    let pull = position(&EngineCall::ImagePull {
        reference: "test_url:5000/test@sha256:mock".to_string(),
    })
    .expect("digest pulled");
    let tag = position(&EngineCall::ImageTag {
        image_id: "sha256:mockid".to_string(),
        reference: "test_url:5000/test".to_string(),
    })
    .expect("image re-tagged");
    let up = calls
        .iter()
        .rposition(|c| {
            matches!(c, EngineCall::Up { force_recreate: true, services, .. } if services.is_empty())
        })
        .expect("app brought back up");

    assert!(pull < tag && tag < up, "unexpected order: {calls:?}");
    assert_eq!(controller.app_state(&app_id()).unwrap(), AppState::Running);

    let app = t.repos.services.get_app(&app_id()).unwrap();
    assert_eq!(
        app.description["services"]["test_service"]["image"],
        "test_url:5000/test"
    );
}

#[tokio::test]
async fn test_update_of_stopped_app_stays_stopped() {
    let t = test_agent(NO_ANCHOR);
    let controller = &t.agent.controller;
    controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap();
    controller.stop_app(&app_id()).await.unwrap();
    t.driver.fail_once(EngineOp::Pull, "pull access denied for test_url:5000/test");

    let query = UpdateQuery {
        images: vec!["test_url:5000/test:2.0".to_string()],
        eventid: None,
    };
    let err = controller.update_app(&app_id(), query).await.unwrap_err();

    assert!(matches!(err, AgentError::NotFoundImage(_)));
    assert_eq!(controller.app_state(&app_id()).unwrap(), AppState::Exited);
    assert_eq!(t.driver.calls().last().map(EngineCall::op), Some(EngineOp::Stop));
}

#[tokio::test]
async fn test_update_success_persists_descriptor() {
    let t = test_agent(NO_ANCHOR);
    let controller = &t.agent.controller;
    controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap();

    let query = UpdateQuery {
        images: vec!["test_url:5000/test:2.0".to_string()],
        eventid: Some("evt-update".to_string()),
    };
    controller.update_app(&app_id(), query).await.unwrap();

    let detail = controller.get_app(&app_id()).await.unwrap();
    assert_eq!(detail.app.state, AppState::Running);
    assert_eq!(
        detail.app.description["services"]["test_service"]["image"],
        "test_url:5000/test:2.0"
    );
    assert!(t.driver.calls().contains(&EngineCall::UpWithEvent {
        app_id: TEST_APP_ID.to_string(),
        event_id: "evt-update".to_string(),
        services: vec!["test_service".to_string()],
    }));
}

#[tokio::test]
async fn test_update_clears_registry_overlay() {
    let t = test_agent(NO_ANCHOR);
    let controller = &t.agent.controller;
    controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap();

    let notification: RegistryNotification = serde_json::from_str(
        r#"{"events":[{"action":"push","target":{"repository":"test","tag":"2.0"},"request":{"host":"test_url:5000"}}]}"#,
    )
    .unwrap();
    controller.handle_events(&app_id(), notification).await.unwrap();
    let app = t.repos.services.get_app(&app_id()).unwrap();
    assert!(app.images[0].changes.is_some());

    controller
        .update_app(&app_id(), UpdateQuery::default())
        .await
        .unwrap();

    let app = t.repos.services.get_app(&app_id()).unwrap();
    assert_eq!(app.state, AppState::Running);
    assert!(app.images[0].changes.is_none());
}

#[tokio::test]
async fn test_update_with_unknown_repository_is_rejected() {
    let t = test_agent(NO_ANCHOR);
    let controller = &t.agent.controller;
    controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap();
    t.driver.reset_calls();

    let query = UpdateQuery {
        images: vec!["other/repo:2.0".to_string()],
        eventid: None,
    };
    assert!(controller.update_app(&app_id(), query).await.is_err());
    assert!(t.driver.calls().is_empty());
    assert_eq!(controller.app_state(&app_id()).unwrap(), AppState::Running);
}

#[tokio::test]
async fn test_registry_events_are_idempotent() {
    let t = test_agent(NO_ANCHOR);
    let controller = &t.agent.controller;
    controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap();

    let payload = r#"{"events":[
        {"action":"push","target":{"repository":"test","tag":"2.0"},"request":{"host":"test_url:5000"}},
        {"action":"pull","target":{"repository":"test","tag":"2.0"},"request":{"host":"test_url:5000"}}
    ]}"#;

    for _ in 0..2 {
        let notification: RegistryNotification = serde_json::from_str(payload).unwrap();
        controller.handle_events(&app_id(), notification).await.unwrap();
    }

    let app = t.repos.services.get_app(&app_id()).unwrap();
    let changes = app.images[0].changes.clone().expect("overlay recorded");
    assert_eq!(changes.tag, "2.0");
    assert_eq!(changes.status, ChangeStatus::Update);
}

#[tokio::test]
async fn test_delete_forgets_app() {
    let t = test_agent(NO_ANCHOR);
    let controller = &t.agent.controller;
    controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap();

    controller.delete_app(&app_id()).await.unwrap();

    assert!(controller.list_apps().unwrap().is_empty());
    assert!(!t.driver.is_subscribed(TEST_APP_ID));
    let err = controller.get_app(&app_id()).await.unwrap_err();
    assert!(matches!(err, AgentError::InvalidAppId(_)));
}

#[tokio::test]
async fn test_delete_tolerates_shared_images() {
    let t = test_agent(NO_ANCHOR);
    let controller = &t.agent.controller;
    controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap();
    t.driver.fail_once(
        EngineOp::DownWithRemoveImages,
        "conflict: unable to remove repository reference \"test_url:5000/test:1.0\"",
    );

    controller.delete_app(&app_id()).await.unwrap();
    assert!(controller.list_apps().unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_keeps_app_when_events_cannot_be_disabled() {
    let t = test_agent(NO_ANCHOR);
    let controller = &t.agent.controller;
    controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap();
    t.driver.reset_calls();
    t.driver
        .fail_once(EngineOp::Events, "Cannot connect to the Docker daemon");

    assert!(controller.delete_app(&app_id()).await.is_err());

    assert_eq!(
        t.driver.calls().last(),
        Some(&EngineCall::Up {
            app_id: TEST_APP_ID.to_string(),
            force_recreate: false,
            services: vec![],
        })
    );
    assert_eq!(controller.list_apps().unwrap().len(), 1);
    assert_eq!(controller.app_state(&app_id()).unwrap(), AppState::Running);
    assert!(t.agent.monitor.is_enabled(&app_id()).await);
}

#[tokio::test]
async fn test_recover_restores_persisted_state() {
    let before = test_agent(NO_ANCHOR);
    before
        .agent
        .controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap();
    before
        .repos
        .services
        .update_app_state(&app_id(), AppState::Updating)
        .unwrap();

    let after = test_agent_with(before.repos.clone(), NO_ANCHOR);
    after.agent.controller.recover().await.unwrap();

    assert!(after.driver.is_subscribed(TEST_APP_ID));
    assert!(after.driver.calls().contains(&EngineCall::Up {
        app_id: TEST_APP_ID.to_string(),
        force_recreate: false,
        services: vec![],
    }));
    assert_eq!(
        after.agent.controller.app_state(&app_id()).unwrap(),
        AppState::Running
    );
}

#[tokio::test]
async fn test_recover_keeps_stopped_apps_stopped() {
    let before = test_agent(NO_ANCHOR);
    let controller = &before.agent.controller;
    controller
        .deploy_app(TEST_YAML, DeployQuery::default())
        .await
        .unwrap();
    controller.stop_app(&app_id()).await.unwrap();

    let after = test_agent_with(before.repos.clone(), NO_ANCHOR);
    after.agent.controller.recover().await.unwrap();

    assert_eq!(after.driver.count(EngineOp::Up), 0);
    assert_eq!(after.driver.count(EngineOp::Stop), 1);
    assert_eq!(
        after.agent.controller.app_state(&app_id()).unwrap(),
        AppState::Exited
    );
}
