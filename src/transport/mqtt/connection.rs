//! Connection state, configuration and the broker link seam
//!
//! Everything here is either a pure function or a thin adapter over
//! `rumqttc`; the async coordination lives in [`super::client`].

use crate::config::{GatewayConfig, DEFAULT_MQTT_PORT};
use crate::signer::Signer;
use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions, QoS, TlsConfiguration, Transport as RumqttcTransport};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Keep-alive interval negotiated with the broker
pub const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Capacity of the rumqttc request channel
pub const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Length of the generated MQTT client id
pub const CLIENT_ID_LEN: usize = 10;

/// Lifecycle of the MQTT link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress
    Connecting,
    /// Broker accepted the connection
    Connected,
    /// Closed on request
    Disconnected,
    /// Link dropped or handshake failed; the network loop is retrying
    Reconnecting,
    /// Broker rejected the credentials. Terminal.
    Unauthorized,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Unauthorized => "unauthorized",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconnection backoff configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delays in milliseconds for the first attempts
    pub backoff_pattern: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![250, 500, 1000, 2000],
            sustained_delay: 3000,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay in milliseconds for the given 1-based attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Failed to read CA certificate {path}")]
    InvalidCertificate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Broker rejected the gateway credentials")]
    Unauthorized,
    #[error("Gateway already connected")]
    AlreadyStarted,
}

/// Publish/subscribe seam over the MQTT client library
#[async_trait]
pub trait MqttLink: Send + Sync + 'static {
    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), MqttError>;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError>;

    async fn disconnect(&self) -> Result<(), MqttError>;
}

#[async_trait]
impl MqttLink for AsyncClient {
    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), MqttError> {
        AsyncClient::publish(self, topic, qos, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        AsyncClient::subscribe(self, topic, qos)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        AsyncClient::disconnect(self)
            .await
            .map_err(|e| MqttError::DisconnectFailed(Box::new(e)))
    }
}

/// Map a numeric QoS level onto rumqttc's enum; anything above 2 is clamped
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Random client id: the first ten upper-case hex digits of a v4 UUID
pub fn generate_client_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(CLIENT_ID_LEN);
    id.to_uppercase()
}

/// Broker credentials: the access key, and its HMAC under the secret as password
pub fn broker_credentials(access_key: &str, signer: &Signer) -> (String, String) {
    (access_key.to_string(), signer.sign(access_key.as_bytes()))
}

/// Build rumqttc options for the configured broker
pub fn configure_mqtt_options(
    config: &GatewayConfig,
    client_id: &str,
    signer: &Signer,
) -> Result<MqttOptions, MqttError> {
    let host = config.api_host();
    let port = config.api_port().unwrap_or(DEFAULT_MQTT_PORT);
    let mut options = MqttOptions::new(client_id, host, port);

    let (username, password) = broker_credentials(&config.access_key, signer);
    options.set_credentials(username, password);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(true);

    if config.protocol.is_secure() {
        let transport = match &config.cert_path {
            Some(path) => {
                let ca = std::fs::read(path).map_err(|source| MqttError::InvalidCertificate {
                    path: path.clone(),
                    source,
                })?;
                RumqttcTransport::Tls(TlsConfiguration::Simple {
                    ca,
                    alpn: None,
                    client_auth: None,
                })
            }
            None => RumqttcTransport::tls_with_default_config(),
        };
        options.set_transport(transport);
    }

    Ok(options)
}
