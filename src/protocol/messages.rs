//! Wire message types for the Datonis platform
//!
//! Outbound envelopes serialize their fields in declaration order, which is
//! the order the platform signs and verifies. Inbound types cover the
//! acknowledgement sent back for every MQTT message, the error bodies the
//! platform returns on failure, and signed instructions.

use crate::error::{GatewayError, GatewayResult};
use crate::thing::Thing;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::error;

/// Status code the platform uses for an accepted message
pub const HTTP_OK: u16 = 200;

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Kinds of outbound message and where each one is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Heartbeat,
    Event,
    Register,
    Alert,
    InstructionAck,
}

impl MessageKind {
    /// REST path, or `None` when the kind has no HTTP route
    pub fn http_path(self) -> Option<&'static str> {
        match self {
            MessageKind::Heartbeat => Some("/api/v3/things/heartbeat.json"),
            MessageKind::Event => Some("/api/v3/things/event.json"),
            MessageKind::Register => Some("/api/v3/things/register.json"),
            MessageKind::Alert => Some("/api/v3/alerts.json"),
            MessageKind::InstructionAck => None,
        }
    }

    /// Last segment of the outbound MQTT topic
    pub fn mqtt_suffix(self) -> &'static str {
        match self {
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Event => "event",
            MessageKind::Register => "register",
            MessageKind::Alert | MessageKind::InstructionAck => "alert",
        }
    }

    /// MQTT QoS level used for publishing
    pub fn qos_level(self) -> u8 {
        match self {
            MessageKind::Event | MessageKind::Register => 1,
            MessageKind::Heartbeat | MessageKind::Alert | MessageKind::InstructionAck => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Event => "event",
            MessageKind::Register => "register",
            MessageKind::Alert => "alert",
            MessageKind::InstructionAck => "instruction_ack",
        }
    }
}

/// `[latitude, longitude]`
pub type Waypoint = [f64; 2];

/// Heartbeat: the thing is alive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Heartbeat {
    pub thing_key: String,
    pub timestamp: i64,
}

/// Telemetry data point for one thing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThingEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waypoint: Option<Waypoint>,
    pub thing_key: String,
    pub timestamp: i64,
}

/// Several events sent as one message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkEvents {
    pub events: Vec<ThingEvent>,
}

/// Registration snapshot of a thing
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Registration {
    #[serde(flatten)]
    pub thing: Thing,
    pub timestamp: i64,
}

/// Alert severity, carried as `alert_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Info = 0,
    Warning = 1,
    Error = 2,
    Critical = 3,
}

impl AlertLevel {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// What an alert refers to: a thing, or a previously received instruction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AlertTarget {
    ThingKey(String),
    AlertKey(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub message: String,
    #[serde(flatten)]
    pub target: AlertTarget,
    pub alert_type: u8,
    pub data: Value,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertEnvelope {
    pub alert: Alert,
}

pub fn create_thing_heartbeat(thing: &Thing, timestamp: Option<i64>) -> Heartbeat {
    Heartbeat {
        thing_key: thing.thing_key.clone(),
        timestamp: timestamp.unwrap_or_else(now_millis),
    }
}

/// Build an event; pass `None` for `data` to send only a waypoint and vice versa.
pub fn create_thing_event(
    thing: &Thing,
    data: Option<Value>,
    waypoint: Option<Waypoint>,
    timestamp: Option<i64>,
) -> ThingEvent {
    ThingEvent {
        data,
        waypoint,
        thing_key: thing.thing_key.clone(),
        timestamp: timestamp.unwrap_or_else(now_millis),
    }
}

pub fn create_thing_register(thing: &Thing, timestamp: Option<i64>) -> Registration {
    Registration {
        thing: thing.clone(),
        timestamp: timestamp.unwrap_or_else(now_millis),
    }
}

pub fn create_alert(
    thing_key: &str,
    message: &str,
    level: AlertLevel,
    data: Value,
    timestamp: Option<i64>,
) -> AlertEnvelope {
    build_alert(
        AlertTarget::ThingKey(thing_key.to_string()),
        message,
        level,
        data,
        timestamp,
    )
}

/// Alert reporting the execution result of an instruction
pub fn create_instruction_alert(
    alert_key: &str,
    message: &str,
    level: AlertLevel,
    data: Value,
    timestamp: Option<i64>,
) -> AlertEnvelope {
    build_alert(
        AlertTarget::AlertKey(alert_key.to_string()),
        message,
        level,
        data,
        timestamp,
    )
}

fn build_alert(
    target: AlertTarget,
    message: &str,
    level: AlertLevel,
    data: Value,
    timestamp: Option<i64>,
) -> AlertEnvelope {
    AlertEnvelope {
        alert: Alert {
            message: message.to_string(),
            target,
            alert_type: level.code(),
            data,
            timestamp: timestamp.unwrap_or_else(now_millis),
        },
    }
}

/// Convert an envelope into an insertion-ordered JSON object
pub fn to_payload<T: Serialize>(envelope: &T) -> GatewayResult<Map<String, Value>> {
    match serde_json::to_value(envelope)? {
        Value::Object(map) => Ok(map),
        other => Err(GatewayError::invalid_payload(format!(
            "envelope must serialize to a JSON object, got {other}"
        ))),
    }
}

/// Acknowledgement published by the platform on the `httpAck` topic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckMessage {
    /// Signature of the message being acknowledged
    pub context: String,
    pub http_code: u16,
    #[serde(default)]
    pub http_msg: Option<Value>,
}

impl AckMessage {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn is_ok(&self) -> bool {
        self.http_code == HTTP_OK
    }

    /// Decode the structured error body, if any
    pub fn error_body(&self) -> Option<ErrorBody> {
        self.http_msg.as_ref().and_then(ErrorBody::from_value)
    }
}

/// One `{code, message}` error reported by the platform
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ErrorEntry {
    #[serde(deserialize_with = "code_as_string")]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

fn code_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Error body returned by the platform: either a bare list of entries or an
/// object carrying them under `errors`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ErrorBody {
    List(Vec<ErrorEntry>),
    Wrapped { errors: Vec<ErrorEntry> },
}

impl ErrorBody {
    /// Decode a response body; blank or unrecognised bodies yield `None`
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        serde_json::from_str(text).ok()
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }

    pub fn entries(&self) -> &[ErrorEntry] {
        match self {
            ErrorBody::List(entries) => entries,
            ErrorBody::Wrapped { errors } => errors,
        }
    }

    /// Log every entry at error level
    pub fn log_errors(&self) {
        for entry in self.entries() {
            error!(code = %entry.code, "Error {} : {}", entry.code, entry.message);
        }
    }
}

/// Signed instruction as received on an `executeInstruction` topic, minus
/// `hash` and `access_key`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstructionEnvelope {
    pub timestamp: i64,
    pub thing_key: String,
    pub alert_key: String,
    pub instruction_wrapper: InstructionWrapper,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstructionWrapper {
    pub instruction: Value,
}

/// Verified instruction handed to the application
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub timestamp: i64,
    pub thing_key: String,
    pub alert_key: String,
    pub instruction: Value,
}

impl From<InstructionEnvelope> for Instruction {
    fn from(envelope: InstructionEnvelope) -> Self {
        Self {
            timestamp: envelope.timestamp,
            thing_key: envelope.thing_key,
            alert_key: envelope.alert_key,
            instruction: envelope.instruction_wrapper.instruction,
        }
    }
}
