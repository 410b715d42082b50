//! Mock implementations for testing
//!
//! Provides a recording MQTT link, a recording instruction handler and a mock
//! transport so gateways can be exercised without a broker or HTTP server.

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{Instruction, MessageKind};
use crate::thing::Thing;
use crate::transport::mqtt::{
    ConnectionState, GatewayHandle, InstructionHandler, MqttError, MqttLink,
};
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::QoS;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One message handed to [`MockLink::publish`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub qos: QoS,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    /// Payload decoded as an ordered JSON object (empty if it is not one)
    pub fn json(&self) -> Map<String, Value> {
        match serde_json::from_slice(&self.payload) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// The `hash` field carried by the payload
    pub fn hash(&self) -> Option<String> {
        self.json()
            .get("hash")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Recording MQTT link
#[derive(Debug, Default)]
pub struct MockLink {
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    should_fail: AtomicBool,
    disconnects: AtomicUsize,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A link whose publishes and subscribes all fail
    pub fn failing() -> Self {
        let link = Self::default();
        link.set_failing(true);
        link
    }

    pub fn set_failing(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    pub async fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn subscribed_topics(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .await
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub async fn clear_history(&self) {
        self.published.lock().await.clear();
        self.subscriptions.lock().await.clear();
    }

    /// Poll until at least `count` messages were published or `timeout` elapses
    pub async fn wait_for_publishes(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Vec<PublishedMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let published = self.published().await;
            if published.len() >= count || tokio::time::Instant::now() >= deadline {
                return published;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Poll until at least `count` subscriptions were made or `timeout` elapses
    pub async fn wait_for_subscriptions(&self, count: usize, timeout: Duration) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let topics = self.subscribed_topics().await;
            if topics.len() >= count || tokio::time::Instant::now() >= deadline {
                return topics;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

#[async_trait]
impl MqttLink for MockLink {
    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), MqttError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(MqttError::PublishFailed("Mock publish failure".into()));
        }
        self.published.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            qos,
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), MqttError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(MqttError::SubscriptionFailed("Mock subscribe failure".into()));
        }
        self.subscriptions.lock().await.push((topic.to_string(), qos));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What [`RecordingHandler`] does after recording an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerBehavior {
    Succeed,
    Fail,
    Panic,
}

/// Instruction handler that records every instruction it receives
#[derive(Debug)]
pub struct RecordingHandler {
    received: Mutex<Vec<Instruction>>,
    behavior: HandlerBehavior,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::with_behavior(HandlerBehavior::Succeed)
    }

    pub fn with_behavior(behavior: HandlerBehavior) -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            behavior,
        }
    }

    pub async fn received(&self) -> Vec<Instruction> {
        self.received.lock().await.clone()
    }

    /// Poll until at least `count` instructions arrived or `timeout` elapses
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Instruction> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let received = self.received().await;
            if received.len() >= count || tokio::time::Instant::now() >= deadline {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstructionHandler for RecordingHandler {
    async fn handle(
        &self,
        _gateway: &GatewayHandle,
        instruction: Instruction,
    ) -> GatewayResult<()> {
        self.received.lock().await.push(instruction);
        match self.behavior {
            HandlerBehavior::Succeed => Ok(()),
            HandlerBehavior::Fail => Err(GatewayError::handler("mock handler failure")),
            HandlerBehavior::Panic => panic!("mock handler panic"),
        }
    }
}

/// Mock transport recording every delivery
#[derive(Debug, Default)]
pub struct MockTransport {
    pub delivered: Arc<Mutex<Vec<(MessageKind, Map<String, Value>)>>>,
    pub tracked: Arc<Mutex<Vec<String>>>,
    pub connected: Arc<AtomicBool>,
    pub should_fail: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose deliveries all report failure
    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub async fn get_delivered(&self) -> Vec<(MessageKind, Map<String, Value>)> {
        self.delivered.lock().await.clone()
    }

    pub async fn get_tracked(&self) -> Vec<String> {
        self.tracked.lock().await.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&mut self) -> GatewayResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) -> GatewayResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn deliver(&self, kind: MessageKind, payload: Map<String, Value>) -> GatewayResult<bool> {
        self.delivered.lock().await.push((kind, payload));
        Ok(!self.should_fail)
    }

    async fn track_thing(&self, thing: &Thing) {
        let mut tracked = self.tracked.lock().await;
        if !tracked.contains(&thing.thing_key) {
            tracked.push(thing.thing_key.clone());
        }
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        None
    }
}
