//! HTTP gateway integration tests against a mock platform API

use datonis_edge::protocol::{create_thing_event, AlertLevel};
use datonis_edge::signer::Signer;
use datonis_edge::{create_gateway, GatewayConfig, GatewayError, Protocol, Thing};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> GatewayConfig {
    let address = server.address();
    GatewayConfig::new("access-1", "secret", Protocol::Http)
        .with_host(address.ip().to_string())
        .with_port(address.port())
}

async fn mount_ok(server: &MockServer, route: &str) {
    Mock::given(method("POST"))
        .and(path(route))
        .and(header("X-Access-Key", "access-1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_every_message_kind_reaches_its_route() {
    let mock_server = MockServer::start().await;
    for route in [
        "/api/v3/things/register.json",
        "/api/v3/things/heartbeat.json",
        "/api/v3/things/event.json",
        "/api/v3/alerts.json",
    ] {
        mount_ok(&mock_server, route).await;
    }

    let mut gateway = create_gateway(config_for(&mock_server)).unwrap();
    gateway.connect().await.unwrap();
    let thing = Thing::new("T", "Compressor").with_description("Thing for compressor");

    assert!(gateway.thing_register(&thing).await);
    assert!(gateway.thing_heartbeat(&thing).await);
    let event = create_thing_event(&thing, Some(json!({"pressure": 42})), None, None);
    assert!(gateway.thing_event(&event).await);
    assert!(gateway.bulk_thing_event(vec![event.clone(), event]).await);
    assert!(
        gateway
            .alert(&thing.thing_key, "Example alert", AlertLevel::Info, json!({"foo": "bar"}))
            .await
    );
    gateway.disconnect().await.unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    let paths: Vec<&str> = requests.iter().map(|r| r.url.path()).collect();
    assert_eq!(
        paths,
        vec![
            "/api/v3/things/register.json",
            "/api/v3/things/heartbeat.json",
            "/api/v3/things/event.json",
            "/api/v3/things/event.json",
            "/api/v3/alerts.json",
        ]
    );

    let signer = Signer::new("secret");
    for request in &requests {
        let signature = request
            .headers
            .get("X-Dtn-Signature")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(signer.verify(&request.body, signature));
    }

    let register: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(register["thing_key"], "T");
    assert_eq!(register["description"], "Thing for compressor");

    let bulk: Value = serde_json::from_slice(&requests[3].body).unwrap();
    assert_eq!(bulk["events"].as_array().unwrap().len(), 2);

    let alert: Value = serde_json::from_slice(&requests[4].body).unwrap();
    assert_eq!(alert["alert"]["alert_type"], 0);
    assert_eq!(alert["alert"]["thing_key"], "T");
}

#[tokio::test]
async fn test_platform_rejection_is_false() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!([
            {"code": "401", "message": "Signature mismatch"}
        ])))
        .mount(&mock_server)
        .await;

    let gateway = create_gateway(config_for(&mock_server)).unwrap();
    assert!(!gateway.thing_heartbeat(&Thing::new("T", "Compressor")).await);
}

#[tokio::test]
async fn test_instruction_features_unsupported_over_http() {
    let mock_server = MockServer::start().await;
    let gateway = create_gateway(config_for(&mock_server)).unwrap();

    let ack = gateway
        .instruction_ack("AK-1", "done", AlertLevel::Info, json!({}))
        .await;
    assert!(matches!(ack, Err(GatewayError::Unsupported { .. })));

    let handler = gateway
        .set_instruction_handler(std::sync::Arc::new(
            datonis_edge::testing::RecordingHandler::new(),
        ))
        .await;
    assert!(matches!(handler, Err(GatewayError::Unsupported { .. })));

    assert!(mock_server.received_requests().await.unwrap().is_empty());
}
