//! Thread-safe metrics collection
//!
//! Lock-free counters for outbound sends, acknowledgement correlation,
//! the instruction pipeline and connection transitions.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics
pub struct MetricsCollector {
    // Outbound
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    http_requests: AtomicU64,
    http_failures: AtomicU64,

    // Acknowledgements
    acks_matched: AtomicU64,
    acks_ignored: AtomicU64,
    ack_timeouts: AtomicU64,
    ack_rejections: AtomicU64,

    // Instructions
    instructions_received: AtomicU64,
    instructions_dispatched: AtomicU64,
    instructions_rejected: AtomicU64,
    instructions_dropped: AtomicU64,
    handler_failures: AtomicU64,

    // Connection
    mqtt_connected: AtomicBool,
    connection_transitions: AtomicU64,
    reconnect_attempts: AtomicU64,
    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
            http_failures: AtomicU64::new(0),
            acks_matched: AtomicU64::new(0),
            acks_ignored: AtomicU64::new(0),
            ack_timeouts: AtomicU64::new(0),
            ack_rejections: AtomicU64::new(0),
            instructions_received: AtomicU64::new(0),
            instructions_dispatched: AtomicU64::new(0),
            instructions_rejected: AtomicU64::new(0),
            instructions_dropped: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            connection_transitions: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn http_request(&self, success: bool) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.http_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn ack_matched(&self) {
        self.acks_matched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_ignored(&self) {
        self.acks_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_timeout(&self) {
        self.ack_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_rejected(&self) {
        self.ack_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn instruction_received(&self) {
        self.instructions_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn instruction_dispatched(&self) {
        self.instructions_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn instruction_rejected(&self) {
        self.instructions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn instruction_dropped(&self) {
        self.instructions_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_failed(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection state change
    pub fn connection_transition(&self, connected: bool) {
        self.connection_transitions.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(connected, Ordering::Relaxed);
    }

    pub fn reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all counters (for testing)
    pub fn reset(&self) {
        for counter in [
            &self.messages_published,
            &self.publish_failures,
            &self.http_requests,
            &self.http_failures,
            &self.acks_matched,
            &self.acks_ignored,
            &self.ack_timeouts,
            &self.ack_rejections,
            &self.instructions_received,
            &self.instructions_dispatched,
            &self.instructions_rejected,
            &self.instructions_dropped,
            &self.handler_failures,
            &self.connection_transitions,
            &self.reconnect_attempts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        MetricsSnapshot {
            outbound: OutboundMetrics {
                messages_published: load(&self.messages_published),
                publish_failures: load(&self.publish_failures),
                http_requests: load(&self.http_requests),
                http_failures: load(&self.http_failures),
            },
            acks: AckMetrics {
                matched: load(&self.acks_matched),
                ignored: load(&self.acks_ignored),
                timeouts: load(&self.ack_timeouts),
                rejections: load(&self.ack_rejections),
            },
            instructions: InstructionMetrics {
                received: load(&self.instructions_received),
                dispatched: load(&self.instructions_dispatched),
                rejected: load(&self.instructions_rejected),
                dropped: load(&self.instructions_dropped),
                handler_failures: load(&self.handler_failures),
            },
            connection: ConnectionMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                transitions: load(&self.connection_transitions),
                reconnect_attempts: load(&self.reconnect_attempts),
            },
            uptime_seconds: now.saturating_sub(load(&self.uptime_start)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub outbound: OutboundMetrics,
    pub acks: AckMetrics,
    pub instructions: InstructionMetrics,
    pub connection: ConnectionMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct OutboundMetrics {
    pub messages_published: u64,
    pub publish_failures: u64,
    pub http_requests: u64,
    pub http_failures: u64,
}

#[derive(Debug, Serialize)]
pub struct AckMetrics {
    pub matched: u64,
    pub ignored: u64,
    pub timeouts: u64,
    pub rejections: u64,
}

#[derive(Debug, Serialize)]
pub struct InstructionMetrics {
    pub received: u64,
    pub dispatched: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub handler_failures: u64,
}

#[derive(Debug, Serialize)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub transitions: u64,
    pub reconnect_attempts: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
