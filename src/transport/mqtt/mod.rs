//! Acknowledged MQTT transport for the Datonis platform
//!
//! Every outbound message is signed, published and then held until the
//! platform acknowledges it on the `httpAck` topic. Signed instructions
//! arriving on per-thing topics are verified and handed to an
//! [`InstructionHandler`].
//!
//! # Architecture
//!
//! The module separates pure logic from I/O:
//!
//! - [`connection`] - connection state, reconnect backoff, broker options
//! - [`state_machine`] - pure connection state transitions
//! - [`message_handler`] - raw `rumqttc` events to [`InboundEvent`]s and routing
//! - [`correlator`] - sign, publish and wait for the matching ack
//! - [`instructions`] - instruction verification and the worker loop
//! - [`client`] - task coordination and the public gateway types
//!
//! # Usage
//!
//! ```rust,no_run
//! use datonis_edge::config::{GatewayConfig, Protocol};
//! use datonis_edge::protocol::MessageKind;
//! use datonis_edge::transport::mqtt::MqttGateway;
//! use serde_json::{json, Map};
//!
//! # tokio_test::block_on(async {
//! let config = GatewayConfig::new("access-key", "secret-key", Protocol::Mqtt);
//! let mut gateway = MqttGateway::new(config)?;
//! gateway.start().await?;
//!
//! let mut payload = Map::new();
//! payload.insert("thing_key".to_string(), json!("T"));
//! payload.insert("timestamp".to_string(), json!(1700000000000i64));
//! let acknowledged = gateway.handle().send(MessageKind::Heartbeat, payload).await;
//! println!("acknowledged: {acknowledged}");
//!
//! gateway.stop().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod correlator;
pub mod instructions;
pub mod message_handler;
pub mod state_machine;

pub use client::{GatewayHandle, MqttGateway, ACK_SUBSCRIBE_QOS, INSTRUCTION_SUBSCRIBE_QOS};
pub use connection::{ConnectionState, MqttError, MqttLink, ReconnectConfig};
pub use correlator::AckCorrelator;
pub use instructions::{
    verify_instruction, HandlerSlot, InstructionHandler, InstructionOutcome, InstructionRejection,
};
pub use message_handler::{InboundEvent, MessageHandler, MessageRouter};
pub use state_machine::{ConnectionEvent, PublishGate, StateMachine};
