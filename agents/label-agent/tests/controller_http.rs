//! HTTP-level tests for the controller client and soft update protocol.

use std::sync::Arc;

use label_agent::agent::labels::LabelSet;
use label_agent::agent::soft_update::{SoftUpdater, UpdateOutcome};
use label_agent::cli::config::ControllerConfig;
use label_agent::controller::client::{ClientError, HttpConnector, LabelSession};
use label_agent::controller::protocol::LabelMutation;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const AGENT: &str = "agent-1";

fn config(server: &MockServer) -> ControllerConfig {
    ControllerConfig {
        url: server.uri(),
        username: Some("agent".to_string()),
        password: Some("secret".to_string()),
        retry_attempts: 3,
        retry_backoff_ms: 0,
        ..ControllerConfig::default()
    }
}

fn labels_xml(labels: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><labelResponse><labels>{}</labels></labelResponse>",
        labels
    )
}

async fn mount_labels(server: &MockServer, labels: &str) {
    Mock::given(method("GET"))
        .and(path("/plugin/swarm/getSlaveLabels"))
        .and(query_param("name", AGENT))
        .respond_with(ResponseTemplate::new(200).set_body_string(labels_xml(labels)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn get_labels_sends_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plugin/swarm/getSlaveLabels"))
        .and(header("authorization", "Basic YWdlbnQ6c2VjcmV0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(labels_xml("swarm linux")))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = HttpConnector::new(config(&server)).session().unwrap();
    let labels = session.get_labels(AGENT).await.unwrap();
    assert_eq!(labels, "swarm linux");
}

#[tokio::test]
async fn get_labels_rejects_malformed_xml() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plugin/swarm/getSlaveLabels"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>login</body></html>"))
        .mount(&server)
        .await;

    let mut session = HttpConnector::new(config(&server)).session().unwrap();
    let err = session.get_labels(AGENT).await.unwrap_err();
    assert!(matches!(err, ClientError::Malformed { .. }));
}

#[tokio::test]
async fn mutation_carries_crumb() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/crumbIssuer/api/json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"crumb":"abc123","crumbRequestField":"Jenkins-Crumb"}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/plugin/swarm/addSlaveLabels"))
        .and(header("Jenkins-Crumb", "abc123"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let mut session = HttpConnector::new(config(&server)).session().unwrap();
    session
        .mutate_labels(LabelMutation::Add, AGENT, "a ")
        .await
        .unwrap();
    session
        .mutate_labels(LabelMutation::Add, AGENT, "b ")
        .await
        .unwrap();
}

#[tokio::test]
async fn mutation_refetches_crumb_after_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/crumbIssuer/api/json"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/crumbIssuer/api/json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"crumb":"abc","crumbRequestField":"Jenkins-Crumb"}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/plugin/swarm/addSlaveLabels"))
        .and(header("Jenkins-Crumb", "abc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403))
        .expect(0)
        .mount(&server)
        .await;

    let mut session = HttpConnector::new(config(&server)).session().unwrap();
    session
        .mutate_labels(LabelMutation::Add, AGENT, "a ")
        .await
        .unwrap();
    session
        .mutate_labels(LabelMutation::Add, AGENT, "b ")
        .await
        .unwrap();
}

#[tokio::test]
async fn mutation_fails_when_crumb_issuer_rejects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/crumbIssuer/api/json"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut session = HttpConnector::new(config(&server)).session().unwrap();
    let err = session
        .mutate_labels(LabelMutation::Remove, AGENT, "a ")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Status { status: 401, .. }));
}

#[tokio::test]
async fn mutation_retries_until_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/plugin/swarm/removeSlaveLabels"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let mut session = HttpConnector::new(config(&server)).session().unwrap();
    let err = session
        .mutate_labels(LabelMutation::Remove, AGENT, "a ")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RetriesExhausted { attempts: 3, .. }));
}

#[tokio::test]
async fn mutation_does_not_retry_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/plugin/swarm/removeSlaveLabels"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = HttpConnector::new(config(&server)).session().unwrap();
    let err = session
        .mutate_labels(LabelMutation::Remove, AGENT, "a ")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Status { status: 403, .. }));
}

#[tokio::test]
async fn soft_update_replaces_labels_in_order() {
    let server = MockServer::start().await;
    mount_labels(&server, "swarm a b").await;
    Mock::given(method("POST"))
        .and(path("/plugin/swarm/removeSlaveLabels"))
        .and(query_param("name", AGENT))
        .and(query_param("labels", "a b "))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/plugin/swarm/addSlaveLabels"))
        .and(query_param("name", AGENT))
        .and(query_param("labels", "a b c "))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let updater = SoftUpdater::new(Arc::new(HttpConnector::new(config(&server))), AGENT, 1000);
    let outcome = updater.update(&LabelSet::new("a b c")).await;
    assert_eq!(outcome, UpdateOutcome::Success);

    let posts: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| request.method.as_str() == "POST")
        .map(|request| request.url.path().to_string())
        .collect();
    assert_eq!(
        posts,
        vec![
            "/plugin/swarm/removeSlaveLabels".to_string(),
            "/plugin/swarm/addSlaveLabels".to_string(),
        ]
    );
}

#[tokio::test]
async fn soft_update_fails_on_server_error_without_mutations() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plugin/swarm/getSlaveLabels"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let updater = SoftUpdater::new(Arc::new(HttpConnector::new(config(&server))), AGENT, 1000);
    let outcome = updater.update(&LabelSet::new("a b c")).await;
    assert!(matches!(outcome, UpdateOutcome::SoftUpdateFailed(_)));
}

#[tokio::test]
async fn soft_update_reports_unreachable_controller() {
    // Nothing listens on the port once the listener is dropped
    let url = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    };
    let connector = HttpConnector::new(ControllerConfig {
        url,
        retry_backoff_ms: 0,
        ..ControllerConfig::default()
    });

    let outcome = SoftUpdater::new(Arc::new(connector), AGENT, 1000)
        .update(&LabelSet::new("a"))
        .await;
    assert!(matches!(outcome, UpdateOutcome::TransportFailed(_)));
}
