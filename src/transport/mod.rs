//! Transport layer for reaching the platform
//!
//! Two transports exist: a stateless signed HTTP POST per message and an
//! acknowledged MQTT channel that also carries inbound instructions.

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::MessageKind;
use crate::thing::Thing;
use serde_json::{Map, Value};
use std::sync::Arc;

pub mod http;
pub mod mqtt;

use mqtt::{ConnectionState, InstructionHandler};

/// Transport trait for delivering gateway messages
///
/// This trait provides an abstraction over HTTP and MQTT so the gateway
/// facade can pick one at runtime and tests can inject a mock.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Short transport name used in logs and errors
    fn name(&self) -> &'static str;

    /// Open the transport
    async fn connect(&mut self) -> GatewayResult<()>;

    /// Close the transport
    async fn disconnect(&mut self) -> GatewayResult<()>;

    /// Deliver one envelope; true when the platform accepted it.
    ///
    /// Platform rejections and network failures are `Ok(false)`; an error is
    /// returned only when the transport cannot carry this kind at all.
    async fn deliver(&self, kind: MessageKind, payload: Map<String, Value>) -> GatewayResult<bool>;

    /// Remember a registered thing for instruction subscriptions
    async fn track_thing(&self, _thing: &Thing) {}

    /// Register the handler for verified instructions
    async fn set_instruction_handler(
        &self,
        _handler: Arc<dyn InstructionHandler>,
    ) -> GatewayResult<()> {
        Err(GatewayError::unsupported(self.name(), "instruction_handler"))
    }

    /// Current connection state, for transports that have one
    fn connection_state(&self) -> Option<ConnectionState>;
}

#[async_trait::async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn connect(&mut self) -> GatewayResult<()> {
        (**self).connect().await
    }

    async fn disconnect(&mut self) -> GatewayResult<()> {
        (**self).disconnect().await
    }

    async fn deliver(&self, kind: MessageKind, payload: Map<String, Value>) -> GatewayResult<bool> {
        (**self).deliver(kind, payload).await
    }

    async fn track_thing(&self, thing: &Thing) {
        (**self).track_thing(thing).await
    }

    async fn set_instruction_handler(
        &self,
        handler: Arc<dyn InstructionHandler>,
    ) -> GatewayResult<()> {
        (**self).set_instruction_handler(handler).await
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        (**self).connection_state()
    }
}

pub use http::HttpTransport;
pub use mqtt::MqttGateway;
