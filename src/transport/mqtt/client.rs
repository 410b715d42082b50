//! MQTT gateway: task coordination and the public handle
//!
//! Three tasks run while the gateway is connected:
//!
//! - the network loop polls the `rumqttc` event loop and turns raw events
//!   into [`InboundEvent`]s
//! - the coordinator applies state transitions, re-subscribes on connect,
//!   forwards acks to the correlator and enqueues instructions
//! - the instruction worker verifies and dispatches instructions
//!
//! Sends run on the caller's task through [`GatewayHandle::send`].

use super::connection::{
    configure_mqtt_options, generate_client_id, qos_from_level, ConnectionState, MqttError,
    MqttLink, ReconnectConfig, REQUEST_CHANNEL_CAPACITY,
};
use super::correlator::AckCorrelator;
use super::instructions::{run_instruction_worker, HandlerSlot, InstructionHandler};
use super::message_handler::{InboundEvent, MessageHandler, MessageRouter};
use super::state_machine::{ConnectionEvent, StateMachine};
use crate::config::GatewayConfig;
use crate::error::GatewayResult;
use crate::observability::metrics::metrics;
use crate::protocol::{
    create_alert, create_instruction_alert, to_payload, AckMessage, AlertLevel, MessageKind,
    TopicBuilder,
};
use crate::signer::Signer;
use crate::thing::Thing;
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, QoS};
use serde_json::{Map, Value};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// QoS for the acknowledgement subscription
pub const ACK_SUBSCRIBE_QOS: QoS = QoS::AtLeastOnce;

/// QoS for per-thing instruction subscriptions
pub const INSTRUCTION_SUBSCRIBE_QOS: QoS = QoS::ExactlyOnce;

/// How long `disconnect` waits for background tasks to wind down
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct Shared {
    config: GatewayConfig,
    signer: Signer,
    topics: TopicBuilder,
    link: Arc<dyn MqttLink>,
    state_tx: watch::Sender<ConnectionState>,
    correlator: AckCorrelator,
    things: Mutex<Vec<Thing>>,
}

/// Cloneable handle to a running MQTT gateway.
///
/// Instruction handlers receive one so they can report results back with
/// [`GatewayHandle::instruction_ack`].
#[derive(Clone)]
pub struct GatewayHandle {
    shared: Arc<Shared>,
}

impl GatewayHandle {
    pub fn client_id(&self) -> &str {
        self.shared.topics.client_id()
    }

    pub fn access_key(&self) -> &str {
        &self.shared.config.access_key
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub(crate) fn signer(&self) -> &Signer {
        &self.shared.signer
    }

    /// Sign and publish one message, then wait for its acknowledgement
    pub async fn send(&self, kind: MessageKind, payload: Map<String, Value>) -> bool {
        let topic = self.shared.topics.outbound(kind.mqtt_suffix());
        let state_rx = self.shared.state_tx.subscribe();
        debug!(kind = kind.as_str(), topic = %topic, "Sending message");

        self.shared
            .correlator
            .send_signed(
                self.shared.link.as_ref(),
                &self.shared.signer,
                &self.shared.config.access_key,
                &state_rx,
                &topic,
                payload,
                qos_from_level(kind.qos_level()),
            )
            .await
    }

    /// Raise an alert for a thing
    pub async fn alert(
        &self,
        thing_key: &str,
        message: &str,
        level: AlertLevel,
        data: Value,
    ) -> GatewayResult<bool> {
        let payload = to_payload(&create_alert(thing_key, message, level, data, None))?;
        Ok(self.send(MessageKind::Alert, payload).await)
    }

    /// Report the execution result of a received instruction
    pub async fn instruction_ack(
        &self,
        alert_key: &str,
        message: &str,
        level: AlertLevel,
        data: Value,
    ) -> GatewayResult<bool> {
        let payload = to_payload(&create_instruction_alert(
            alert_key, message, level, data, None,
        ))?;
        Ok(self.send(MessageKind::InstructionAck, payload).await)
    }

    /// Add a thing to the instruction registry.
    ///
    /// A new thing is subscribed right away when connected; otherwise the
    /// next transition into Connected picks it up. Returns false for a thing
    /// that was already tracked.
    pub async fn track_thing(&self, thing: &Thing) -> bool {
        {
            let mut things = self.shared.things.lock().await;
            if things.iter().any(|t| t.thing_key == thing.thing_key) {
                return false;
            }
            things.push(thing.clone());
        }
        if self.connection_state() == ConnectionState::Connected {
            self.subscribe_thing(thing).await;
        } else {
            debug!(thing_key = %thing.thing_key, "Not connected, subscribing on connect");
        }
        true
    }

    /// Keys of every tracked thing, in registration order
    pub async fn tracked_things(&self) -> Vec<String> {
        self.shared
            .things
            .lock()
            .await
            .iter()
            .map(|t| t.thing_key.clone())
            .collect()
    }

    async fn subscribe_thing(&self, thing: &Thing) {
        if self.connection_state() == ConnectionState::Unauthorized {
            error!("Unauthorised to subscribe, please check access key and secret key");
            return;
        }

        let topic = self.shared.topics.instruction(&thing.thing_key);
        match self
            .shared
            .link
            .subscribe(&topic, INSTRUCTION_SUBSCRIBE_QOS)
            .await
        {
            Ok(()) => info!(thing = %thing.name, "Subscribed for instructions"),
            Err(e) => warn!(thing = %thing.name, "Could not subscribe for instructions: {}", e),
        }
    }

    /// Subscribe to the ack topic and every tracked thing's instruction topic
    async fn resubscribe_all(&self) {
        let ack_topic = self.shared.topics.ack();
        if let Err(e) = self.shared.link.subscribe(&ack_topic, ACK_SUBSCRIBE_QOS).await {
            error!("Failed to subscribe to {}: {}", ack_topic, e);
        }

        let things = self.shared.things.lock().await.clone();
        for thing in &things {
            self.subscribe_thing(thing).await;
        }
    }

    /// Apply a connection event; returns `(from, to)`
    fn apply_event(&self, event: &ConnectionEvent) -> (ConnectionState, ConnectionState) {
        let mut transition = (ConnectionState::Disconnected, ConnectionState::Disconnected);
        self.shared.state_tx.send_if_modified(|state| {
            let from = *state;
            let to = StateMachine::next_state(from, event);
            transition = (from, to);
            *state = to;
            from != to
        });

        let (from, to) = transition;
        if from != to {
            StateMachine::log_state_transition(from, to);
            metrics().connection_transition(to == ConnectionState::Connected);
        }
        transition
    }
}

/// MQTT implementation of the gateway transport
pub struct MqttGateway {
    handle: GatewayHandle,
    handler: HandlerSlot,
    // EventLoop is not Sync; the mutex is only ever reached through &mut self
    event_loop: std::sync::Mutex<Option<EventLoop>>,
    reconnect_config: ReconnectConfig,
    ack_tx: mpsc::UnboundedSender<AckMessage>,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    inbound_rx: Option<mpsc::UnboundedReceiver<InboundEvent>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    network_task: Option<JoinHandle<EventLoop>>,
    coordinator_task: Option<JoinHandle<mpsc::UnboundedReceiver<InboundEvent>>>,
    worker_task: Option<JoinHandle<()>>,
}

impl MqttGateway {
    /// Build a gateway talking to the configured broker
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;
        let signer = Signer::new(&config.secret_key);
        let client_id = generate_client_id();
        let options = configure_mqtt_options(&config, &client_id, &signer)?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let mut gateway = Self::assemble(config, signer, client_id, Arc::new(client));
        *gateway.event_loop_slot() = Some(event_loop);
        Ok(gateway)
    }

    /// Build a gateway over an arbitrary link.
    ///
    /// No network loop runs; link events are fed in through
    /// [`MqttGateway::inbound_sender`].
    pub fn with_link(config: GatewayConfig, link: Arc<dyn MqttLink>) -> GatewayResult<Self> {
        config.validate()?;
        let signer = Signer::new(&config.secret_key);
        Ok(Self::assemble(config, signer, generate_client_id(), link))
    }

    fn assemble(
        config: GatewayConfig,
        signer: Signer,
        client_id: String,
        link: Arc<dyn MqttLink>,
    ) -> Self {
        let topics = TopicBuilder::new(client_id, config.access_key.clone());
        let (correlator, ack_tx) = AckCorrelator::new(config.ack.clone());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let shared = Shared {
            config,
            signer,
            topics,
            link,
            state_tx,
            correlator,
            things: Mutex::new(Vec::new()),
        };

        Self {
            handle: GatewayHandle {
                shared: Arc::new(shared),
            },
            handler: Arc::new(RwLock::new(None)),
            event_loop: std::sync::Mutex::new(None),
            reconnect_config: ReconnectConfig::default(),
            ack_tx,
            inbound_tx,
            inbound_rx: Some(inbound_rx),
            shutdown_tx: None,
            network_task: None,
            coordinator_task: None,
            worker_task: None,
        }
    }

    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    fn event_loop_slot(&mut self) -> &mut Option<EventLoop> {
        self.event_loop
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handle(&self) -> GatewayHandle {
        self.handle.clone()
    }

    /// Sender for injecting link events, as the network loop would
    pub fn inbound_sender(&self) -> mpsc::UnboundedSender<InboundEvent> {
        self.inbound_tx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.coordinator_task.is_some()
    }

    /// Start the background tasks
    pub async fn start(&mut self) -> Result<(), MqttError> {
        if self.is_running() {
            return Err(MqttError::AlreadyStarted);
        }
        if self.handle.connection_state() == ConnectionState::Unauthorized {
            return Err(MqttError::Unauthorized);
        }
        let mut inbound_rx = self.inbound_rx.take().ok_or(MqttError::AlreadyStarted)?;
        // Events left over from the previous session must not replay
        while inbound_rx.try_recv().is_ok() {}

        self.handle.apply_event(&ConnectionEvent::ConnectRequested);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let capacity = self.handle.shared.config.instructions.queue_capacity;
        let (instruction_tx, instruction_rx) = mpsc::channel(capacity);
        let mut router = MessageRouter::new(self.ack_tx.clone());
        router.set_instruction_sender(instruction_tx);

        self.worker_task = Some(tokio::spawn(run_instruction_worker(
            self.handle.clone(),
            instruction_rx,
            self.handler.clone(),
        )));

        let span = crate::mqtt_span!(client_id = %self.handle.client_id());
        self.coordinator_task = Some(tokio::spawn(
            run_coordinator(self.handle.clone(), inbound_rx, router, shutdown_rx.clone())
                .instrument(span.clone()),
        ));

        if let Some(event_loop) = self.event_loop_slot().take() {
            self.network_task = Some(tokio::spawn(
                run_network_loop(
                    event_loop,
                    self.inbound_tx.clone(),
                    self.reconnect_config.clone(),
                    shutdown_rx,
                )
                .instrument(span),
            ));
        }

        self.shutdown_tx = Some(shutdown_tx);
        info!(client_id = %self.handle.client_id(), "MQTT gateway started");
        Ok(())
    }

    /// Disconnect from the broker and stop the background tasks
    pub async fn stop(&mut self) -> Result<(), MqttError> {
        let was_connected = self.handle.connection_state() == ConnectionState::Connected;
        self.handle.apply_event(&ConnectionEvent::DisconnectRequested);

        let result = if was_connected {
            self.handle.shared.link.disconnect().await
        } else {
            self.signal_shutdown();
            Ok(())
        };

        if let Some(mut network_task) = self.network_task.take() {
            // The loop exits on its own once DISCONNECT is flushed
            let joined = match tokio::time::timeout(SHUTDOWN_GRACE, &mut network_task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("Network loop still running after DISCONNECT, forcing shutdown");
                    self.signal_shutdown();
                    network_task.await
                }
            };
            match joined {
                Ok(event_loop) => *self.event_loop_slot() = Some(event_loop),
                Err(e) => error!("MQTT network loop ended abnormally: {}", e),
            }
        }

        self.finish_stop(result).await
    }

    async fn finish_stop(&mut self, result: Result<(), MqttError>) -> Result<(), MqttError> {
        self.signal_shutdown();

        if let Some(coordinator) = self.coordinator_task.take() {
            match coordinator.await {
                Ok(inbound_rx) => self.inbound_rx = Some(inbound_rx),
                Err(e) => error!("MQTT coordinator ended abnormally: {}", e),
            }
        }

        if let Some(worker) = self.worker_task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, worker).await.is_err() {
                warn!("Instruction worker did not stop in time");
            }
        }

        self.shutdown_tx = None;
        info!("MQTT gateway disconnected");
        result
    }

    fn signal_shutdown(&self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            shutdown_tx.send_replace(true);
        }
    }
}

impl Drop for MqttGateway {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

#[async_trait]
impl Transport for MqttGateway {
    fn name(&self) -> &'static str {
        "MQTT"
    }

    async fn connect(&mut self) -> GatewayResult<()> {
        Ok(self.start().await?)
    }

    async fn disconnect(&mut self) -> GatewayResult<()> {
        Ok(self.stop().await?)
    }

    async fn deliver(&self, kind: MessageKind, payload: Map<String, Value>) -> GatewayResult<bool> {
        Ok(self.handle.send(kind, payload).await)
    }

    async fn track_thing(&self, thing: &Thing) {
        self.handle.track_thing(thing).await;
    }

    async fn set_instruction_handler(
        &self,
        handler: Arc<dyn InstructionHandler>,
    ) -> GatewayResult<()> {
        *self.handler.write().await = Some(handler);
        Ok(())
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        Some(self.handle.connection_state())
    }
}

/// Apply link events until shutdown; returns the inbound receiver for reuse
async fn run_coordinator(
    handle: GatewayHandle,
    mut inbound_rx: mpsc::UnboundedReceiver<InboundEvent>,
    router: MessageRouter,
    mut shutdown_rx: watch::Receiver<bool>,
) -> mpsc::UnboundedReceiver<InboundEvent> {
    debug!("MQTT coordinator started");
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            event = inbound_rx.recv() => {
                let Some(event) = event else { break };
                handle_inbound(&handle, &router, event).await;
            }
        }
    }
    debug!("MQTT coordinator stopped");
    inbound_rx
}

async fn handle_inbound(handle: &GatewayHandle, router: &MessageRouter, event: InboundEvent) {
    if let Some(connection_event) = event.connection_event() {
        let (from, to) = handle.apply_event(&connection_event);
        if StateMachine::should_resubscribe(from, to) {
            handle.resubscribe_all().await;
        }
        return;
    }

    match event {
        InboundEvent::AckReceived(ack) => router.forward_ack(ack),
        InboundEvent::InstructionReceived(payload) => {
            router.enqueue_instruction(payload);
        }
        _ => {}
    }
}

/// Poll the rumqttc event loop until shutdown or auth rejection
async fn run_network_loop(
    mut event_loop: EventLoop,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    reconnect_config: ReconnectConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> EventLoop {
    info!("Starting MQTT network loop");
    let mut attempts = 0u32;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received, stopping network loop");
                    break;
                }
            }
            polled = event_loop.poll() => match polled {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("DISCONNECT sent");
                    break;
                }
                Ok(event) => {
                    let Some(inbound) = MessageHandler::translate_event(&event) else {
                        continue;
                    };
                    let auth_rejected = matches!(inbound, InboundEvent::AuthRejected(_));
                    if inbound == InboundEvent::Connected {
                        attempts = 0;
                    }
                    let _ = inbound_tx.send(inbound);
                    if auth_rejected {
                        break;
                    }
                }
                Err(e) => {
                    let inbound = MessageHandler::translate_error(&e);
                    let auth_rejected = matches!(inbound, InboundEvent::AuthRejected(_));
                    let _ = inbound_tx.send(inbound);
                    if auth_rejected {
                        error!("Broker refused the credentials, giving up: {}", e);
                        break;
                    }

                    attempts += 1;
                    metrics().reconnect_attempt();
                    let delay_ms = reconnect_config.calculate_backoff_delay(attempts);
                    warn!("MQTT connection error: {}, retrying in {}ms", e, delay_ms);
                    if !interruptible_sleep(&mut shutdown_rx, delay_ms).await {
                        break;
                    }
                }
            }
        }
    }

    info!("MQTT network loop stopped");
    event_loop
}

/// Sleep unless shutdown is signalled first; returns false on shutdown
async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => {
            changed.is_ok() && !*shutdown_rx.borrow()
        }
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}
