//! Inbound MQTT event translation and routing
//!
//! The network loop turns raw `rumqttc` events into [`InboundEvent`]s; the
//! coordinator hands acks and instructions to [`MessageRouter`], which never
//! waits on a consumer.

use super::state_machine::ConnectionEvent;
use crate::observability::metrics::metrics;
use crate::protocol::{classify_topic, AckMessage, TopicKind};
use rumqttc::{ConnectReturnCode, ConnectionError, Event, Packet};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Typed inbound event produced by the network loop
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Connected,
    AuthRejected(String),
    ConnectionLost(String),
    BrokerDisconnect,
    AckReceived(AckMessage),
    /// Raw payload from an instruction topic, not yet verified
    InstructionReceived(Vec<u8>),
}

impl InboundEvent {
    /// State machine input carried by this event, if any
    pub fn connection_event(&self) -> Option<ConnectionEvent> {
        match self {
            InboundEvent::Connected => Some(ConnectionEvent::ConnAckReceived),
            InboundEvent::AuthRejected(_) => Some(ConnectionEvent::AuthRejected),
            InboundEvent::ConnectionLost(reason) => {
                Some(ConnectionEvent::NetworkError(reason.clone()))
            }
            InboundEvent::BrokerDisconnect => Some(ConnectionEvent::DisconnectedByBroker),
            InboundEvent::AckReceived(_) | InboundEvent::InstructionReceived(_) => None,
        }
    }
}

/// Pure translation of raw MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Whether a CONNACK return code means the credentials were refused
    pub fn is_auth_rejection(code: ConnectReturnCode) -> bool {
        matches!(
            code,
            ConnectReturnCode::NotAuthorized | ConnectReturnCode::BadUserNamePassword
        )
    }

    /// Translate one polled event; `None` for traffic nobody needs to see
    pub fn translate_event(event: &Event) -> Option<InboundEvent> {
        match event {
            Event::Incoming(Packet::ConnAck(connack)) => match connack.code {
                ConnectReturnCode::Success => Some(InboundEvent::Connected),
                code if Self::is_auth_rejection(code) => {
                    Some(InboundEvent::AuthRejected(format!("{code:?}")))
                }
                code => Some(InboundEvent::ConnectionLost(format!(
                    "connection refused: {code:?}"
                ))),
            },
            Event::Incoming(Packet::Publish(publish)) => {
                Self::route_publish(&publish.topic, &publish.payload)
            }
            Event::Incoming(Packet::Disconnect) => Some(InboundEvent::BrokerDisconnect),
            Event::Incoming(other) => {
                debug!(target: "mqtt_transport", "MQTT event: {:?}", other);
                None
            }
            Event::Outgoing(_) => None,
        }
    }

    /// Translate a network loop error
    pub fn translate_error(error: &ConnectionError) -> InboundEvent {
        match error {
            ConnectionError::ConnectionRefused(code) if Self::is_auth_rejection(*code) => {
                InboundEvent::AuthRejected(format!("{code:?}"))
            }
            other => InboundEvent::ConnectionLost(other.to_string()),
        }
    }

    /// Route an inbound publish by topic suffix
    pub fn route_publish(topic: &str, payload: &[u8]) -> Option<InboundEvent> {
        match classify_topic(topic) {
            TopicKind::Ack => match AckMessage::parse(payload) {
                Ok(ack) => Some(InboundEvent::AckReceived(ack)),
                Err(e) => {
                    warn!(topic = %topic, "Discarding unparseable ack: {}", e);
                    None
                }
            },
            TopicKind::Instruction => Some(InboundEvent::InstructionReceived(payload.to_vec())),
            TopicKind::Other => {
                debug!(topic = %topic, "Ignoring message on unexpected topic");
                None
            }
        }
    }
}

/// Hands inbound acks to the correlator and instructions to the worker queue
pub struct MessageRouter {
    ack_tx: mpsc::UnboundedSender<AckMessage>,
    instruction_tx: Option<mpsc::Sender<Vec<u8>>>,
}

impl MessageRouter {
    pub fn new(ack_tx: mpsc::UnboundedSender<AckMessage>) -> Self {
        Self {
            ack_tx,
            instruction_tx: None,
        }
    }

    pub fn set_instruction_sender(&mut self, sender: mpsc::Sender<Vec<u8>>) {
        self.instruction_tx = Some(sender);
    }

    pub fn forward_ack(&self, ack: AckMessage) {
        debug!(context = %ack.context, http_code = ack.http_code, "Ack received");
        if self.ack_tx.send(ack).is_err() {
            debug!("Ack correlator gone, ack dropped");
        }
    }

    /// Enqueue a raw instruction; returns false when it was dropped
    pub fn enqueue_instruction(&self, payload: Vec<u8>) -> bool {
        metrics().instruction_received();

        let Some(sender) = &self.instruction_tx else {
            warn!("Instruction received but the instruction worker is not running - dropped");
            metrics().instruction_dropped();
            return false;
        };

        match sender.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Instruction queue full - newest instruction dropped");
                metrics().instruction_dropped();
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Instruction worker stopped - instruction dropped");
                metrics().instruction_dropped();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, Publish, QoS};

    #[test]
    fn test_translate_connack() {
        let ok = Event::Incoming(Packet::ConnAck(ConnAck::new(ConnectReturnCode::Success, false)));
        assert_eq!(
            MessageHandler::translate_event(&ok),
            Some(InboundEvent::Connected)
        );

        let denied = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::NotAuthorized,
            false,
        )));
        assert!(matches!(
            MessageHandler::translate_event(&denied),
            Some(InboundEvent::AuthRejected(_))
        ));

        let unavailable = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::ServiceUnavailable,
            false,
        )));
        assert!(matches!(
            MessageHandler::translate_event(&unavailable),
            Some(InboundEvent::ConnectionLost(_))
        ));
    }

    #[test]
    fn test_translate_refusal_error() {
        let error = ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword);
        assert!(matches!(
            MessageHandler::translate_error(&error),
            InboundEvent::AuthRejected(_)
        ));

        let error = ConnectionError::NetworkTimeout;
        assert!(matches!(
            MessageHandler::translate_error(&error),
            InboundEvent::ConnectionLost(_)
        ));
    }

    #[test]
    fn test_translate_ack_publish() {
        let publish = Publish::new(
            "Altizon/Datonis/CID/httpAck",
            QoS::AtLeastOnce,
            br#"{"context":"abc","http_code":200}"#.to_vec(),
        );
        let event = Event::Incoming(Packet::Publish(publish));
        match MessageHandler::translate_event(&event) {
            Some(InboundEvent::AckReceived(ack)) => {
                assert_eq!(ack.context, "abc");
                assert!(ack.is_ok());
            }
            other => panic!("unexpected route: {other:?}"),
        }
    }

    #[test]
    fn test_route_publish_by_topic() {
        let payload = br#"{"hash":"x"}"#;
        assert_eq!(
            MessageHandler::route_publish("Altizon/Datonis/ak/thing/t/executeInstruction", payload),
            Some(InboundEvent::InstructionReceived(payload.to_vec()))
        );
        assert_eq!(
            MessageHandler::route_publish("Altizon/Datonis/CID/event", payload),
            None
        );
        assert_eq!(
            MessageHandler::route_publish("Altizon/Datonis/CID/httpAck", b"not json"),
            None
        );
    }

    #[test]
    fn test_disconnect_packet() {
        assert_eq!(
            MessageHandler::translate_event(&Event::Incoming(Packet::Disconnect)),
            Some(InboundEvent::BrokerDisconnect)
        );
    }

    #[test]
    fn test_connection_event_mapping() {
        assert_eq!(
            InboundEvent::Connected.connection_event(),
            Some(ConnectionEvent::ConnAckReceived)
        );
        assert_eq!(
            InboundEvent::InstructionReceived(vec![]).connection_event(),
            None
        );
    }

    #[tokio::test]
    async fn test_router_drops_newest_when_full() {
        let (ack_tx, _ack_rx) = mpsc::unbounded_channel();
        let (instruction_tx, mut instruction_rx) = mpsc::channel(1);
        let mut router = MessageRouter::new(ack_tx);
        router.set_instruction_sender(instruction_tx);

        assert!(router.enqueue_instruction(b"first".to_vec()));
        assert!(!router.enqueue_instruction(b"second".to_vec()));

        assert_eq!(instruction_rx.recv().await.unwrap(), b"first".to_vec());
        assert!(instruction_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_router_without_worker_drops() {
        let (ack_tx, _ack_rx) = mpsc::unbounded_channel();
        let router = MessageRouter::new(ack_tx);
        assert!(!router.enqueue_instruction(b"lost".to_vec()));
    }

    #[tokio::test]
    async fn test_router_forwards_acks() {
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        let router = MessageRouter::new(ack_tx);
        let ack = AckMessage {
            context: "abc".to_string(),
            http_code: 200,
            http_msg: None,
        };
        router.forward_ack(ack.clone());
        assert_eq!(ack_rx.recv().await, Some(ack));
    }
}
