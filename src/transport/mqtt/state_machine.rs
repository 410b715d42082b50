//! Pure connection state transitions
//!
//! The coordinator task feeds every link event through
//! [`StateMachine::next_state`] and publishes the result on a watch channel.
//! `Unauthorized` is absorbing: no event moves the link out of it.

use super::connection::ConnectionState;
use tracing::{error, info, warn};

/// Events that drive the connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// `connect()` called
    ConnectRequested,
    /// Broker accepted the handshake
    ConnAckReceived,
    /// Broker refused the credentials
    AuthRejected,
    /// Handshake failure other than auth, or the link dropped
    NetworkError(String),
    /// Broker closed the session
    DisconnectedByBroker,
    /// `disconnect()` called
    DisconnectRequested,
}

/// What a send should do given the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishGate {
    Proceed,
    /// Connection is settling; wait and look again
    Wait,
    /// No delivery is possible
    FailFast,
}

/// Pure state transition logic
pub struct StateMachine;

impl StateMachine {
    /// Determine next state after a connection event (pure function)
    pub fn next_state(current: ConnectionState, event: &ConnectionEvent) -> ConnectionState {
        use ConnectionState::*;

        if current == Unauthorized {
            return Unauthorized;
        }

        match event {
            ConnectionEvent::ConnectRequested => Connecting,
            ConnectionEvent::ConnAckReceived => match current {
                Disconnected => Disconnected,
                _ => Connected,
            },
            ConnectionEvent::AuthRejected => Unauthorized,
            ConnectionEvent::NetworkError(_) | ConnectionEvent::DisconnectedByBroker => {
                match current {
                    Disconnected => Disconnected,
                    _ => Reconnecting,
                }
            }
            ConnectionEvent::DisconnectRequested => Disconnected,
        }
    }

    /// Decide whether a send may publish in `state` (pure function)
    pub fn publish_gate(state: ConnectionState) -> PublishGate {
        match state {
            ConnectionState::Connected => PublishGate::Proceed,
            ConnectionState::Connecting | ConnectionState::Reconnecting => PublishGate::Wait,
            ConnectionState::Disconnected | ConnectionState::Unauthorized => PublishGate::FailFast,
        }
    }

    /// Whether entering `to` from `from` requires re-subscribing
    pub fn should_resubscribe(from: ConnectionState, to: ConnectionState) -> bool {
        to == ConnectionState::Connected && from != ConnectionState::Connected
    }

    /// Log connection state transition
    pub fn log_state_transition(from: ConnectionState, to: ConnectionState) {
        match (from, to) {
            (ConnectionState::Reconnecting, ConnectionState::Connected) => {
                info!("MQTT reconnection successful");
            }
            (_, ConnectionState::Connected) => {
                info!("MQTT connection established");
            }
            (ConnectionState::Connected, ConnectionState::Reconnecting) => {
                warn!("MQTT connection lost, reconnecting");
            }
            (_, ConnectionState::Unauthorized) => {
                error!("Unauthorised to connect, please check access key and secret key");
            }
            _ => {
                info!("MQTT connection state: {} -> {}", from, to);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    fn all_events() -> Vec<ConnectionEvent> {
        vec![
            ConnectionEvent::ConnectRequested,
            ConnectionEvent::ConnAckReceived,
            ConnectionEvent::AuthRejected,
            ConnectionEvent::NetworkError("reset".to_string()),
            ConnectionEvent::DisconnectedByBroker,
            ConnectionEvent::DisconnectRequested,
        ]
    }

    #[test]
    fn test_handshake_outcomes() {
        assert_eq!(
            StateMachine::next_state(Connecting, &ConnectionEvent::ConnAckReceived),
            Connected
        );
        assert_eq!(
            StateMachine::next_state(Connecting, &ConnectionEvent::NetworkError("refused".into())),
            Reconnecting
        );
        assert_eq!(
            StateMachine::next_state(Connecting, &ConnectionEvent::AuthRejected),
            Unauthorized
        );
    }

    #[test]
    fn test_connected_transitions() {
        assert_eq!(
            StateMachine::next_state(Connected, &ConnectionEvent::DisconnectRequested),
            Disconnected
        );
        assert_eq!(
            StateMachine::next_state(Connected, &ConnectionEvent::DisconnectedByBroker),
            Reconnecting
        );
        assert_eq!(
            StateMachine::next_state(Reconnecting, &ConnectionEvent::ConnAckReceived),
            Connected
        );
    }

    #[test]
    fn test_unauthorized_is_absorbing() {
        for event in all_events() {
            assert_eq!(StateMachine::next_state(Unauthorized, &event), Unauthorized);
        }
    }

    #[test]
    fn test_disconnected_ignores_late_link_events() {
        assert_eq!(
            StateMachine::next_state(Disconnected, &ConnectionEvent::NetworkError("eof".into())),
            Disconnected
        );
        assert_eq!(
            StateMachine::next_state(Disconnected, &ConnectionEvent::ConnAckReceived),
            Disconnected
        );
        assert_eq!(
            StateMachine::next_state(Disconnected, &ConnectionEvent::ConnectRequested),
            Connecting
        );
    }

    #[test]
    fn test_publish_gate() {
        assert_eq!(StateMachine::publish_gate(Connected), PublishGate::Proceed);
        assert_eq!(StateMachine::publish_gate(Connecting), PublishGate::Wait);
        assert_eq!(StateMachine::publish_gate(Reconnecting), PublishGate::Wait);
        assert_eq!(StateMachine::publish_gate(Disconnected), PublishGate::FailFast);
        assert_eq!(StateMachine::publish_gate(Unauthorized), PublishGate::FailFast);
    }

    #[test]
    fn test_should_resubscribe() {
        assert!(StateMachine::should_resubscribe(Connecting, Connected));
        assert!(StateMachine::should_resubscribe(Reconnecting, Connected));
        assert!(!StateMachine::should_resubscribe(Connected, Connected));
        assert!(!StateMachine::should_resubscribe(Connecting, Reconnecting));
    }
}
