//! The `transport` module owns the broker side of the bridge.
//!
//! It defines the messages received from the broker, the `BrokerLink`
//! abstraction over a publish/subscribe client, the MQTT implementation of
//! that abstraction, and the `Transport` state machine that keeps the
//! subscription alive across link failures.

pub mod link;
pub mod message;
pub mod mqtt;
pub mod session;

pub use link::{BrokerLink, TransportError};
pub use message::{DeliveryToken, RawMessage};
pub use mqtt::MqttLink;
pub use session::{Transport, TransportState};

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;
