//! Acknowledgement correlation for signed MQTT sends
//!
//! The platform answers every message on the `httpAck` topic with the
//! message's own signature as `context`. A send publishes, then waits for the
//! ack carrying its signature. Only one send waits at a time: the receiving
//! end of the ack channel sits behind a mutex, and holding the guard is the
//! pending-ack slot.

use super::connection::{ConnectionState, MqttLink};
use super::state_machine::{PublishGate, StateMachine};
use crate::config::AckSettings;
use crate::observability::metrics::metrics;
use crate::protocol::AckMessage;
use crate::signer::{canonical_json, Signer};
use rumqttc::QoS;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn, Instrument};

/// Outcome of waiting for the connection to settle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Ready,
    Failed(ConnectionState),
}

/// Single-slot acknowledgement correlator
pub struct AckCorrelator {
    slot: Mutex<mpsc::UnboundedReceiver<AckMessage>>,
    settings: AckSettings,
}

impl AckCorrelator {
    /// Create the correlator and the sender the inbound router feeds acks into
    pub fn new(settings: AckSettings) -> (Self, mpsc::UnboundedSender<AckMessage>) {
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let correlator = Self {
            slot: Mutex::new(ack_rx),
            settings,
        };
        (correlator, ack_tx)
    }

    /// Sign `payload`, publish it and wait for the matching acknowledgement.
    ///
    /// Returns true only when the platform acknowledged with status 200.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_signed(
        &self,
        link: &dyn MqttLink,
        signer: &Signer,
        access_key: &str,
        state_rx: &watch::Receiver<ConnectionState>,
        topic: &str,
        mut payload: Map<String, Value>,
        qos: QoS,
    ) -> bool {
        let mut state_rx = state_rx.clone();

        if let Readiness::Failed(state) = self.wait_until_ready(&mut state_rx).await {
            warn!(state = %state, topic = %topic, "Not sending message, connection is {}", state);
            return false;
        }

        let hash = match signer.sign_json(&payload) {
            Ok((_, hash)) => hash,
            Err(e) => {
                error!("Failed to canonicalize payload: {}", e);
                return false;
            }
        };
        payload.insert("hash".to_string(), Value::String(hash.clone()));
        payload.insert(
            "access_key".to_string(),
            Value::String(access_key.to_string()),
        );
        let body = match canonical_json(&payload) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to encode signed payload: {}", e);
                return false;
            }
        };

        let span = crate::ack_span!(context = %hash, topic = %topic);
        self.publish_and_wait(link, &mut state_rx, topic, body, qos, &hash)
            .instrument(span)
            .await
    }

    async fn publish_and_wait(
        &self,
        link: &dyn MqttLink,
        state_rx: &mut watch::Receiver<ConnectionState>,
        topic: &str,
        body: String,
        qos: QoS,
        hash: &str,
    ) -> bool {
        let mut slot = self.slot.lock().await;

        while let Ok(stale) = slot.try_recv() {
            debug!(context = %stale.context, "Discarding stale ack");
        }

        if let Err(e) = link.publish(topic, qos, body.into_bytes()).await {
            error!("Could not send message to {}: {}", topic, e);
            metrics().publish_failed();
            return false;
        }
        metrics().message_published();

        let deadline = Instant::now() + self.settings.max_wait();
        loop {
            tokio::select! {
                ack = slot.recv() => match ack {
                    Some(ack) if ack.context == hash => return Self::evaluate(ack),
                    Some(other) => {
                        debug!(context = %other.context, "Ignoring ack for another message");
                        metrics().ack_ignored();
                    }
                    None => {
                        warn!("Ack channel closed while waiting");
                        return false;
                    }
                },
                _ = Self::unauthorized(state_rx) => {
                    warn!("Connection became unauthorized while waiting for ack");
                    return false;
                }
                _ = sleep_until(deadline) => {
                    error!(
                        "Timed out waiting for ack after {} ticks of {:?}",
                        self.settings.max_retries,
                        self.settings.tick()
                    );
                    metrics().ack_timeout();
                    return false;
                }
            }
        }
    }

    /// Block while the link is connecting or reconnecting
    async fn wait_until_ready(&self, state_rx: &mut watch::Receiver<ConnectionState>) -> Readiness {
        loop {
            let state = *state_rx.borrow_and_update();
            match StateMachine::publish_gate(state) {
                PublishGate::Proceed => return Readiness::Ready,
                PublishGate::FailFast => return Readiness::Failed(state),
                PublishGate::Wait => {
                    info!(state = %state, "Waiting for connection before sending");
                    let changed = timeout(self.settings.connect_poll(), state_rx.changed()).await;
                    if let Ok(Err(_)) = changed {
                        return Readiness::Failed(ConnectionState::Disconnected);
                    }
                }
            }
        }
    }

    /// Resolves once the state is Unauthorized; pends forever if the channel closes
    async fn unauthorized(state_rx: &mut watch::Receiver<ConnectionState>) {
        if state_rx
            .wait_for(|state| *state == ConnectionState::Unauthorized)
            .await
            .is_err()
        {
            std::future::pending::<()>().await;
        }
    }

    fn evaluate(ack: AckMessage) -> bool {
        metrics().ack_matched();
        if ack.is_ok() {
            debug!(context = %ack.context, "Message acknowledged");
            return true;
        }

        metrics().ack_rejected();
        match ack.error_body() {
            Some(body) => body.log_errors(),
            None => error!(
                http_code = ack.http_code,
                "Platform rejected message: {}",
                ack.http_msg.map(|m| m.to_string()).unwrap_or_default()
            ),
        }
        false
    }
}
