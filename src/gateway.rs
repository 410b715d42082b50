//! Gateway facade
//!
//! [`Gateway`] builds the platform envelopes and hands them to a
//! [`Transport`]. Routine sends report plain success; the only typed error a
//! caller has to handle is an operation the transport cannot carry, such as
//! `instruction_ack` over HTTP.

use crate::config::GatewayConfig;
use crate::error::GatewayResult;
use crate::protocol::{
    create_alert, create_instruction_alert, create_thing_heartbeat, create_thing_register,
    to_payload, AlertLevel, BulkEvents, MessageKind, ThingEvent,
};
use crate::thing::Thing;
use crate::transport::mqtt::{ConnectionState, InstructionHandler, MqttGateway};
use crate::transport::{HttpTransport, Transport};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Device-side gateway to the platform
pub struct Gateway<T: Transport> {
    transport: T,
}

impl<T: Transport> Gateway<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub async fn connect(&mut self) -> GatewayResult<()> {
        info!(transport = self.transport.name(), "Connecting gateway");
        self.transport.connect().await
    }

    pub async fn disconnect(&mut self) -> GatewayResult<()> {
        info!(transport = self.transport.name(), "Disconnecting gateway");
        self.transport.disconnect().await
    }

    /// None for stateless transports
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.transport.connection_state()
    }

    pub async fn thing_heartbeat(&self, thing: &Thing) -> bool {
        self.send(MessageKind::Heartbeat, &create_thing_heartbeat(thing, None))
            .await
    }

    /// Send one event built with [`crate::protocol::create_thing_event`]
    pub async fn thing_event(&self, event: &ThingEvent) -> bool {
        self.send(MessageKind::Event, event).await
    }

    /// Send several events as one `{events: [...]}` message
    pub async fn bulk_thing_event(&self, events: Vec<ThingEvent>) -> bool {
        debug!(count = events.len(), "Sending bulk events");
        self.send(MessageKind::Event, &BulkEvents { events }).await
    }

    /// Register a thing and track it for instruction subscriptions.
    ///
    /// The thing is tracked whether or not the platform accepted the
    /// registration, so instructions reach it once it does.
    pub async fn thing_register(&self, thing: &Thing) -> bool {
        let registered = self
            .send(MessageKind::Register, &create_thing_register(thing, None))
            .await;
        self.transport.track_thing(thing).await;

        if registered {
            debug!(thing = %thing.name, "Registered thing");
        } else {
            error!(thing = %thing.name, "Registration failed for thing");
        }
        registered
    }

    pub async fn alert(
        &self,
        thing_key: &str,
        message: &str,
        level: AlertLevel,
        data: Value,
    ) -> bool {
        self.send(
            MessageKind::Alert,
            &create_alert(thing_key, message, level, data, None),
        )
        .await
    }

    /// Report the execution result of an instruction.
    ///
    /// Fails with [`crate::GatewayError::Unsupported`] on transports without
    /// an acknowledged channel.
    pub async fn instruction_ack(
        &self,
        alert_key: &str,
        message: &str,
        level: AlertLevel,
        data: Value,
    ) -> GatewayResult<bool> {
        let payload = to_payload(&create_instruction_alert(alert_key, message, level, data, None))?;
        self.transport
            .deliver(MessageKind::InstructionAck, payload)
            .await
    }

    pub async fn set_instruction_handler(
        &self,
        handler: Arc<dyn InstructionHandler>,
    ) -> GatewayResult<()> {
        self.transport.set_instruction_handler(handler).await
    }

    async fn send<E: Serialize>(&self, kind: MessageKind, envelope: &E) -> bool {
        let payload = match to_payload(envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!(kind = kind.as_str(), "Could not encode message: {}", e);
                return false;
            }
        };

        match self.transport.deliver(kind, payload).await {
            Ok(delivered) => delivered,
            Err(e) => {
                error!(kind = kind.as_str(), "Send failed: {}", e);
                false
            }
        }
    }
}

/// Build a gateway for the configured protocol
pub fn create_gateway(config: GatewayConfig) -> GatewayResult<Gateway<Box<dyn Transport>>> {
    let transport: Box<dyn Transport> = if config.protocol.is_mqtt() {
        Box::new(MqttGateway::new(config)?)
    } else {
        Box::new(HttpTransport::new(&config)?)
    };
    info!(transport = transport.name(), "Gateway created");
    Ok(Gateway::new(transport))
}
