//! Testing utilities and mock implementations
//!
//! Lets gateways be exercised without an MQTT broker or HTTP server.

pub mod mocks;

pub use mocks::*;
