//! Connection lifecycle state machine.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (link loss) -> Reconnecting
//!                                  ^                            |
//!                                  +----------------------------+
//!                 Reconnecting/Connecting -> Failed (subscribe failure)
//! ```
//!
//! Reconnection never gives up on its own: a broker outage only ends when
//! the link comes back or the shutdown token fires. A refused subscription
//! after a successful connect is a configuration problem and is surfaced.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::link::{BrokerLink, TransportError};
use super::message::{DeliveryToken, RawMessage};
use crate::utils::backoff::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

/// Result of a connect + subscribe round.
enum Establish {
    Subscribed,
    LinkLost(TransportError),
    Shutdown,
}

pub struct Transport<L> {
    link: L,
    topic: String,
    reconnect: Backoff,
    startup_attempts: u32,
    state: TransportState,
    /// A connect succeeded and no loss or disconnect has followed.
    link_up: bool,
    reconnects: u64,
}

impl<L: BrokerLink> Transport<L> {
    pub fn new(link: L, topic: impl Into<String>, reconnect: Backoff, startup_attempts: u32) -> Self {
        Self {
            link,
            topic: topic.into(),
            reconnect,
            startup_attempts: startup_attempts.max(1),
            state: TransportState::Disconnected,
            link_up: false,
            reconnects: 0,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Number of successful re-establishments after a link loss.
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Performs the initial connect and subscribe.
    ///
    /// Returns `Ok(false)` when shutdown was requested before the link came
    /// up. Connect failures are retried `startup_attempts` times; a refused
    /// handshake or a refused subscription fails immediately.
    pub async fn start(&mut self, shutdown: &CancellationToken) -> Result<bool, TransportError> {
        self.state = TransportState::Connecting;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(attempt, topic = %self.topic, "connecting to broker");

            let Some(result) = self.connect(shutdown).await else {
                self.state = TransportState::Disconnected;
                return Ok(false);
            };

            match result {
                Ok(()) => match self.subscribe(shutdown).await {
                    Ok(Establish::Subscribed) => return Ok(true),
                    Ok(Establish::Shutdown) => {
                        self.state = TransportState::Disconnected;
                        return Ok(false);
                    }
                    Ok(Establish::LinkLost(err)) if attempt < self.startup_attempts => {
                        warn!(attempt, error = %err, "link lost while subscribing");
                    }
                    Ok(Establish::LinkLost(err)) => {
                        self.state = TransportState::Failed;
                        return Err(err);
                    }
                    Err(err) => return Err(err),
                },
                Err(err @ TransportError::ConnectRefused { .. }) => {
                    error!(error = %err, "broker refused connection");
                    self.state = TransportState::Failed;
                    return Err(err);
                }
                Err(err) if attempt >= self.startup_attempts => {
                    error!(attempts = attempt, error = %err, "giving up connecting to broker");
                    self.state = TransportState::Failed;
                    return Err(err);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "broker connect failed");
                }
            }

            let delay = self.reconnect.delay(attempt - 1);
            if !sleep_or_shutdown(delay, shutdown).await {
                self.state = TransportState::Disconnected;
                return Ok(false);
            }
        }
    }

    /// Waits for the next message, transparently reconnecting on link loss.
    ///
    /// Returns `Ok(None)` once shutdown is requested. Errors are fatal.
    pub async fn next_message(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<Option<RawMessage>, TransportError> {
        loop {
            match self.state {
                TransportState::Connected => {
                    let received = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => None,
                        res = self.link.next_message() => Some(res),
                    };
                    match received {
                        None => return Ok(None),
                        Some(Ok(message)) => return Ok(Some(message)),
                        Some(Err(err)) if err.is_fatal() => {
                            error!(error = %err, "fatal transport error");
                            self.state = TransportState::Failed;
                            return Err(err);
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, topic = %self.topic, "broker link lost, reconnecting");
                            self.link_up = false;
                            self.state = TransportState::Reconnecting { attempt: 0 };
                        }
                    }
                }
                TransportState::Reconnecting { attempt } => {
                    let delay = self.reconnect.delay(attempt);
                    info!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "waiting before reconnect"
                    );
                    if !sleep_or_shutdown(delay, shutdown).await {
                        return Ok(None);
                    }

                    let next_attempt = attempt.saturating_add(1);
                    let Some(result) = self.connect(shutdown).await else {
                        return Ok(None);
                    };
                    if let Err(err) = result {
                        warn!(attempt = next_attempt, error = %err, "reconnect failed");
                        self.state = TransportState::Reconnecting { attempt: next_attempt };
                        continue;
                    }

                    match self.subscribe(shutdown).await? {
                        Establish::Subscribed => {
                            self.reconnects += 1;
                            info!(reconnects = self.reconnects, "broker link re-established");
                        }
                        Establish::LinkLost(err) => {
                            warn!(error = %err, "link lost while resubscribing");
                            self.state = TransportState::Reconnecting { attempt: next_attempt };
                        }
                        Establish::Shutdown => return Ok(None),
                    }
                }
                TransportState::Disconnected
                | TransportState::Connecting
                | TransportState::Failed => return Err(TransportError::NotConnected),
            }
        }
    }

    /// Acknowledges a delivery once the bridge has taken responsibility
    /// for it. Failures are only logged. Sessions are clean, so a message
    /// still unacknowledged when the link drops is discarded by the broker,
    /// not redelivered.
    pub async fn acknowledge(&mut self, token: Option<DeliveryToken>) {
        let Some(token) = token else { return };
        if self.state != TransportState::Connected {
            return;
        }
        if let Err(err) = self.link.acknowledge(token).await {
            warn!(packet_id = token.packet_id, error = %err, "failed to acknowledge message");
        }
    }

    /// Sends DISCONNECT whenever a connection is open, whatever the state.
    pub async fn disconnect(&mut self) {
        if self.link_up {
            self.link.disconnect().await;
            self.link_up = false;
            info!(topic = %self.topic, "disconnected from broker");
        }
        self.state = TransportState::Disconnected;
    }

    async fn connect(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Option<Result<(), TransportError>> {
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            res = self.link.connect() => Some(res),
        };
        if matches!(result, Some(Ok(()))) {
            self.link_up = true;
        }
        result
    }

    async fn subscribe(&mut self, shutdown: &CancellationToken) -> Result<Establish, TransportError> {
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            res = self.link.subscribe(&self.topic) => Some(res),
        };

        match result {
            None => Ok(Establish::Shutdown),
            Some(Ok(())) => {
                self.state = TransportState::Connected;
                info!(topic = %self.topic, "subscribed");
                Ok(Establish::Subscribed)
            }
            Some(Err(err @ TransportError::LinkLoss { .. })) => {
                self.link_up = false;
                Ok(Establish::LinkLost(err))
            }
            Some(Err(err)) => {
                error!(topic = %self.topic, error = %err, "subscription refused");
                self.state = TransportState::Failed;
                Err(err)
            }
        }
    }
}

/// Sleeps for `delay` unless shutdown fires first. Returns `false` on shutdown.
async fn sleep_or_shutdown(delay: std::time::Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
