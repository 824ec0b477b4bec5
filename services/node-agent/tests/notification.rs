//! Event monitoring through to anchor notifications.

mod common;

use std::time::Duration;

use common::{seed_registration, test_agent};
use pharos_node_agent::controller::DeployQuery;
use pharos_node_agent::model::{Event, Subscription, STATUS_STARTED};
use serde_json::{json, Value};
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SUBSCRIBED_YAML: &str = "services:\n  s:\n    image: repo/img:latest\nversion: \"2\"\n";

async fn notifications(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/api/v1/notification/events")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

async fn wait_for_notifications(server: &MockServer, count: usize) -> Vec<Value> {
    for _ in 0..100 {
        let received = notifications(server).await;
        if received.len() >= count {
            return received;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    notifications(server).await
}

fn subscription(event_id: &str, app_id: &str, image_name: &str) -> Subscription {
    Subscription {
        event_id: event_id.to_string(),
        app_id: app_id.to_string(),
        image_name: image_name.to_string(),
    }
}

#[tokio::test]
async fn test_container_event_reaches_every_matching_subscription() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/notification/events"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let t = test_agent(&format!("{}/api/v1", server.uri()));
    seed_registration(&t.repos, "n1");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = t.agent.spawn_monitor(shutdown_rx);

    let detail = t
        .agent
        .controller
        .deploy_app(SUBSCRIBED_YAML, DeployQuery::default())
        .await
        .unwrap();
    let app_id = detail.app.id.to_string();

    t.agent.subscribe(subscription("e1", &app_id, "")).unwrap();
    t.agent.subscribe(subscription("e2", "", "repo/img")).unwrap();
    t.agent.subscribe(subscription("e3", "", "other/img")).unwrap();

    let event = Event::container(&app_id, "s", STATUS_STARTED, Some("cid-1".to_string()));
    assert!(t.driver.emit(event).await);

    let received = wait_for_notifications(&server, 1).await;
    assert_eq!(received.len(), 1);
    let notification = &received[0];

    let mut event_ids: Vec<String> = notification["eventid"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    event_ids.sort();
    assert_eq!(event_ids, vec!["e1".to_string(), "e2".to_string()]);
    assert_eq!(notification["nodeid"], "n1");
    assert_eq!(notification["appid"], json!(app_id));
    assert_eq!(notification["imagename"], "repo/img");
    assert_eq!(notification["status"], "started");

    let _ = shutdown_tx.send(true);
    consumer.await.unwrap();
}

#[tokio::test]
async fn test_deploy_progress_goes_to_its_event_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/notification/events"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let t = test_agent(&format!("{}/api/v1", server.uri()));
    seed_registration(&t.repos, "n1");
    t.agent.subscribe(subscription("e-all", "", "")).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = t.agent.spawn_monitor(shutdown_rx);

    let query = DeployQuery {
        eventid: Some("deploy-1".to_string()),
    };
    t.agent
        .controller
        .deploy_app(SUBSCRIBED_YAML, query)
        .await
        .unwrap();

    let received = wait_for_notifications(&server, 3).await;
    let statuses: Vec<&str> = received
        .iter()
        .map(|n| n["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["pulled", "created", "started"]);
    assert!(received.iter().all(|n| n["eventid"] == json!(["deploy-1"])));

    let _ = shutdown_tx.send(true);
    consumer.await.unwrap();
}
