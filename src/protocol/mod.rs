//! Wire protocol for the Datonis platform
//!
//! Message envelopes, acknowledgement and error bodies, and MQTT topic naming.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
