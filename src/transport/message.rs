//! Messages as received from the broker.

use chrono::{DateTime, Utc};

/// Broker-assigned handle needed to acknowledge a QoS 1/2 delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryToken {
    pub packet_id: u16,
    pub qos: u8,
}

/// A message exactly as it arrived on the subscribed topic.
///
/// The payload is opaque at this point; turning it into a document is the
/// decoder's job.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
    pub token: Option<DeliveryToken>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: DeliveryToken) -> Self {
        self.token = Some(token);
        self
    }
}
