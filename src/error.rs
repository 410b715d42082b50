//! Error types for the Datonis edge SDK
//!
//! Every public operation that can fail for a reason other than "the platform
//! said no" returns a [`GatewayError`]. Platform rejections, acknowledgement
//! timeouts and transport hiccups are reported as `false` results and log
//! entries instead, so background workers never see an error escape.

use crate::config::ConfigError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Main error type for gateway operations
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("MQTT transport error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation not supported by the {transport} gateway: {operation}")]
    Unsupported {
        transport: &'static str,
        operation: &'static str,
    },

    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("Instruction handler failed: {message}")]
    Handler { message: String },
}

impl GatewayError {
    /// Create unsupported-operation error
    pub fn unsupported(transport: &'static str, operation: &'static str) -> Self {
        Self::Unsupported {
            transport,
            operation,
        }
    }

    /// Create invalid payload error
    pub fn invalid_payload<S: Into<String>>(message: S) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }

    /// Create handler error
    pub fn handler<S: Into<String>>(message: S) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_constructor() {
        let error = GatewayError::unsupported("HTTP", "instruction_ack");
        assert!(matches!(error, GatewayError::Unsupported { .. }));
        assert_eq!(
            error.to_string(),
            "Operation not supported by the HTTP gateway: instruction_ack"
        );
    }

    #[test]
    fn test_invalid_payload_constructor() {
        let error = GatewayError::invalid_payload("missing thing_key");
        assert_eq!(error.to_string(), "Invalid payload: missing thing_key");
    }

    #[test]
    fn test_handler_constructor() {
        let error = GatewayError::handler("valve stuck");
        assert!(matches!(error, GatewayError::Handler { .. }));
        assert_eq!(error.to_string(), "Instruction handler failed: valve stuck");
    }

    #[test]
    fn test_from_serde_error() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: GatewayError = serde_err.into();
        assert!(matches!(error, GatewayError::Serialization(_)));
    }

    #[test]
    fn test_from_config_error() {
        let error: GatewayError = ConfigError::MissingSecret.into();
        assert!(error.to_string().starts_with("Configuration error"));
    }
}
