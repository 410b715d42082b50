//! Datonis Edge - Rust Implementation
//!
//! A device-side SDK for reporting telemetry to the Datonis IoT platform.
//!
//! # Overview
//!
//! This crate provides:
//! - Heartbeats, events, registrations and alerts for managed things
//! - A stateless signed HTTP transport
//! - An MQTT transport where every send waits for the platform's signed
//!   acknowledgement
//! - Verified dispatch of remote instructions received over MQTT
//!
//! Every message is authenticated with an HMAC-SHA256 over its canonical JSON
//! encoding, using the secret key shared with the platform.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use datonis_edge::protocol::{create_thing_event, AlertLevel};
//! use datonis_edge::{create_gateway, GatewayConfig, Protocol, Thing};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let config = GatewayConfig::new("access-key", "secret-key", Protocol::Mqtts);
//! let mut gateway = create_gateway(config)?;
//! gateway.connect().await?;
//!
//! let thing = Thing::new("614a5ed34c", "Compressor").bi_directional(true);
//! gateway.thing_register(&thing).await;
//!
//! let event = create_thing_event(&thing, Some(json!({"pressure": 42})), None, None);
//! if !gateway.thing_event(&event).await {
//!     eprintln!("event was not acknowledged");
//! }
//!
//! gateway
//!     .alert(&thing.thing_key, "Pressure high", AlertLevel::Warning, json!({}))
//!     .await;
//! gateway.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod protocol;
pub mod signer;
pub mod testing;
pub mod thing;
pub mod transport;

pub use config::{AckSettings, ConfigError, GatewayConfig, InstructionSettings, Protocol};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{create_gateway, Gateway};
pub use protocol::{AlertLevel, Instruction, MessageKind};
pub use signer::Signer;
pub use thing::Thing;
pub use transport::mqtt::{ConnectionState, GatewayHandle, InstructionHandler, MqttGateway};
pub use transport::{HttpTransport, Transport};
