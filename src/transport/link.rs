//! The broker-facing seam of the transport.
//!
//! `BrokerLink` is the minimal contract the bridge needs from a
//! publish/subscribe client: connect, subscribe, receive, acknowledge and
//! disconnect. The MQTT implementation lives in [`super::mqtt`].

use std::future::Future;

use thiserror::Error;

use super::message::{DeliveryToken, RawMessage};

#[derive(Debug, Error)]
pub enum TransportError {
    /// The broker could not be reached or the handshake did not complete.
    #[error("failed to connect to broker: {reason}")]
    ConnectFailure { reason: String },

    /// The broker answered the handshake with a refusal (credentials, ACL).
    #[error("broker refused connection: {reason}")]
    ConnectRefused { reason: String },

    #[error("failed to subscribe to '{topic}': {reason}")]
    SubscribeFailure { topic: String, reason: String },

    /// An established link went away. Recovered by reconnecting.
    #[error("broker link lost: {reason}")]
    LinkLoss { reason: String },

    #[error("failed to read TLS material from {path}: {source}")]
    Tls {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport is not connected")]
    NotConnected,
}

impl TransportError {
    /// Errors that end the bridge instead of triggering a reconnect.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::SubscribeFailure { .. } | TransportError::Tls { .. }
        )
    }
}

/// Operations the transport drives on a broker client.
///
/// Implementations own the underlying connection exclusively. Every method
/// may suspend; callers bound them with timeouts and shutdown signals.
pub trait BrokerLink: Send {
    fn connect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn subscribe(&mut self, topic: &str)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Waits for the next message on the subscription. Returns
    /// `TransportError::LinkLoss` when the connection drops.
    fn next_message(&mut self) -> impl Future<Output = Result<RawMessage, TransportError>> + Send;

    /// Releases a QoS 1/2 delivery back to the broker.
    fn acknowledge(
        &mut self,
        token: DeliveryToken,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}
