//! Signed HTTP transport
//!
//! Each message is one POST to the platform's REST API. The body is the
//! canonical JSON encoding of the envelope and `X-Dtn-Signature` carries the
//! HMAC over exactly those bytes. There is no connection state and no
//! acknowledgement beyond the HTTP status.

use super::mqtt::ConnectionState;
use super::Transport;
use crate::config::{ConfigError, GatewayConfig, Protocol};
use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics::metrics;
use crate::protocol::{ErrorBody, MessageKind, HTTP_OK};
use crate::signer::{canonical_json, Signer};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

pub const ACCESS_KEY_HEADER: &str = "X-Access-Key";
pub const SIGNATURE_HEADER: &str = "X-Dtn-Signature";

/// Upper bound on one request, connect included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP implementation of the gateway transport
pub struct HttpTransport {
    access_key: String,
    signer: Signer,
    base_url: Url,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            access_key: config.access_key.clone(),
            signer: Signer::new(&config.secret_key),
            base_url: base_url(config)?,
            client,
        })
    }

    /// Root every REST path is resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> GatewayResult<Url> {
        self.base_url.join(path).map_err(|e| {
            GatewayError::from(ConfigError::InvalidConfig(format!(
                "invalid request path {path}: {e}"
            )))
        })
    }

    /// POST a signed JSON payload; true iff the platform answered 200
    pub async fn post_message(
        &self,
        path: &str,
        payload: &Map<String, Value>,
    ) -> GatewayResult<bool> {
        let url = self.endpoint(path)?;
        let body = canonical_json(payload)?;
        let signature = self.signer.sign(body.as_bytes());
        debug!(url = %url, "Posting message");

        let response = self
            .client
            .post(url)
            .header(SIGNATURE_HEADER, signature)
            .header(ACCESS_KEY_HEADER, &self.access_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await;

        let (success, _) = self.read_response(response, "post_message").await;
        Ok(success)
    }

    /// GET with query parameters; returns the success flag and the body text
    pub async fn get_message(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> GatewayResult<(bool, String)> {
        let url = self.endpoint(path)?;
        debug!(url = %url, "Fetching");

        let response = self
            .client
            .get(url)
            .header(ACCESS_KEY_HEADER, &self.access_key)
            .query(params)
            .send()
            .await;

        Ok(self.read_response(response, "get_message").await)
    }

    async fn read_response(
        &self,
        response: Result<reqwest::Response, reqwest::Error>,
        operation: &str,
    ) -> (bool, String) {
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                error!("{} failed: {}", operation, e);
                metrics().http_request(false);
                return (false, String::new());
            }
        };

        let status = response.status().as_u16();
        info!(status, "Response code: {}", status);
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!("Could not read response body: {}", e);
                String::new()
            }
        };
        debug!("Response content: {}", text);

        let success = status == HTTP_OK;
        if !success {
            match ErrorBody::parse(&text) {
                Some(errors) => errors.log_errors(),
                None if !text.trim().is_empty() => {
                    warn!(status, "Unrecognised error body: {}", text.trim())
                }
                None => {}
            }
        }
        metrics().http_request(success);
        (success, text)
    }
}

/// `http(s)://host[:port]/` for the configured protocol
fn base_url(config: &GatewayConfig) -> GatewayResult<Url> {
    let scheme = if config.protocol == Protocol::Https {
        "https"
    } else {
        "http"
    };
    let invalid = |e: String| {
        GatewayError::from(ConfigError::InvalidConfig(format!("invalid API host: {e}")))
    };

    let mut url = Url::parse(&format!("{scheme}://{}", config.api_host()))
        .map_err(|e| invalid(e.to_string()))?;
    if let Some(port) = config.api_port() {
        url.set_port(Some(port))
            .map_err(|_| invalid(format!("cannot set port {port}")))?;
    }
    Ok(url)
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "HTTP"
    }

    async fn connect(&mut self) -> GatewayResult<()> {
        debug!("HTTP transport needs no connection");
        Ok(())
    }

    async fn disconnect(&mut self) -> GatewayResult<()> {
        Ok(())
    }

    async fn deliver(&self, kind: MessageKind, payload: Map<String, Value>) -> GatewayResult<bool> {
        let Some(path) = kind.http_path() else {
            return Err(GatewayError::unsupported(self.name(), kind.as_str()));
        };
        self.post_message(path, &payload).await
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport_for(server: &MockServer) -> HttpTransport {
        let address = server.address();
        let config = GatewayConfig::new("access-1", "secret", Protocol::Http)
            .with_host(address.ip().to_string())
            .with_port(address.port());
        HttpTransport::new(&config).unwrap()
    }

    fn event_payload() -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("data".to_string(), json!({"pressure": 42}));
        payload.insert("thing_key".to_string(), json!("T"));
        payload.insert("timestamp".to_string(), json!(1700000000000i64));
        payload
    }

    #[test]
    fn test_base_url() {
        let https = GatewayConfig::new("ak", "sk", Protocol::Https);
        let transport = HttpTransport::new(&https).unwrap();
        assert_eq!(transport.base_url().as_str(), "https://api.datonis.io/");

        let http = GatewayConfig::new("ak", "sk", Protocol::Http)
            .with_host("localhost")
            .with_port(8080);
        let transport = HttpTransport::new(&http).unwrap();
        assert_eq!(transport.base_url().as_str(), "http://localhost:8080/");
    }

    #[tokio::test]
    async fn test_post_signs_exact_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v3/things/event.json"))
            .and(header("X-Access-Key", "access-1"))
            .and(header("Content-Type", "application/json"))
            .and(header_exists("X-Dtn-Signature"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let transport = transport_for(&mock_server);
        let delivered = transport
            .deliver(MessageKind::Event, event_payload())
            .await
            .unwrap();
        assert!(delivered);

        let requests = mock_server.received_requests().await.unwrap();
        let request = &requests[0];
        assert_eq!(
            String::from_utf8(request.body.clone()).unwrap(),
            r#"{"data":{"pressure":42},"thing_key":"T","timestamp":1700000000000}"#
        );
        let signature = request
            .headers
            .get("X-Dtn-Signature")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(Signer::new("secret").verify(&request.body, signature));
    }

    #[tokio::test]
    async fn test_wrapped_error_body_is_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v3/alerts.json"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "errors": [{"code": "4001", "message": "Unknown thing"}]
            })))
            .mount(&mock_server)
            .await;

        let transport = transport_for(&mock_server);
        let delivered = transport
            .post_message("/api/v3/alerts.json", &event_payload())
            .await
            .unwrap();
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_bare_list_error_body_is_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!([{"code": 401, "message": "Bad signature"}])),
            )
            .mount(&mock_server)
            .await;

        let transport = transport_for(&mock_server);
        assert!(!transport
            .deliver(MessageKind::Heartbeat, event_payload())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_empty_error_body_is_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let transport = transport_for(&mock_server);
        assert!(!transport
            .deliver(MessageKind::Register, event_payload())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_connection_refused_is_failure() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = GatewayConfig::new("ak", "sk", Protocol::Http)
            .with_host("127.0.0.1")
            .with_port(port);
        let transport = HttpTransport::new(&config).unwrap();

        assert!(!transport
            .deliver(MessageKind::Heartbeat, event_payload())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_get_message_returns_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/things.json"))
            .and(header("X-Access-Key", "access-1"))
            .and(query_param("thing_key", "T"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"name":"Compressor"}"#))
            .mount(&mock_server)
            .await;

        let transport = transport_for(&mock_server);
        let (ok, body) = transport
            .get_message("/api/v3/things.json", &[("thing_key", "T")])
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(body, r#"{"name":"Compressor"}"#);
    }

    #[tokio::test]
    async fn test_get_message_failure_keeps_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string(
                r#"{"errors":[{"code":"404","message":"Not found"}]}"#,
            ))
            .mount(&mock_server)
            .await;

        let transport = transport_for(&mock_server);
        let (ok, body) = transport
            .get_message("/api/v3/things.json", &[])
            .await
            .unwrap();
        assert!(!ok);
        assert!(body.contains("Not found"));
    }

    #[tokio::test]
    async fn test_instruction_ack_unsupported_without_io() {
        let mock_server = MockServer::start().await;
        let transport = transport_for(&mock_server);

        let result = transport
            .deliver(MessageKind::InstructionAck, event_payload())
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::Unsupported {
                transport: "HTTP",
                operation: "instruction_ack"
            })
        ));
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }
}
