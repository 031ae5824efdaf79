//! In-memory broker link driven by the test through a channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use super::link::{BrokerLink, TransportError};
use super::message::{DeliveryToken, RawMessage};

pub(crate) enum LinkEvent {
    Message(RawMessage),
    Drop(String),
}

#[derive(Debug, Default)]
pub(crate) struct LinkLog {
    pub connects: u32,
    pub subscribes: Vec<String>,
    pub acks: Vec<DeliveryToken>,
    pub disconnects: u32,
}

pub(crate) struct ScriptedLink {
    events: mpsc::UnboundedReceiver<LinkEvent>,
    connect_results: VecDeque<Result<(), TransportError>>,
    subscribe_results: VecDeque<Result<(), TransportError>>,
    disconnect_delay: Duration,
    log: Arc<Mutex<LinkLog>>,
}

#[derive(Clone)]
pub(crate) struct LinkHandle {
    tx: mpsc::UnboundedSender<LinkEvent>,
    log: Arc<Mutex<LinkLog>>,
}

impl ScriptedLink {
    pub(crate) fn new() -> (Self, LinkHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let link = Self {
            events: rx,
            connect_results: VecDeque::new(),
            subscribe_results: VecDeque::new(),
            disconnect_delay: Duration::ZERO,
            log: log.clone(),
        };
        (link, LinkHandle { tx, log })
    }

    /// Queues results for successive `connect` calls; once exhausted,
    /// connects succeed.
    pub(crate) fn with_connect_results(
        mut self,
        results: impl IntoIterator<Item = Result<(), TransportError>>,
    ) -> Self {
        self.connect_results.extend(results);
        self
    }

    pub(crate) fn with_subscribe_results(
        mut self,
        results: impl IntoIterator<Item = Result<(), TransportError>>,
    ) -> Self {
        self.subscribe_results.extend(results);
        self
    }

    /// Makes `disconnect` take as long as a real broker flush.
    pub(crate) fn with_disconnect_delay(mut self, delay: Duration) -> Self {
        self.disconnect_delay = delay;
        self
    }
}

impl LinkHandle {
    pub(crate) fn publish(&self, payload: &str) {
        let _ = self
            .tx
            .send(LinkEvent::Message(RawMessage::new("meters/test", payload)));
    }

    pub(crate) fn publish_raw(&self, message: RawMessage) {
        let _ = self.tx.send(LinkEvent::Message(message));
    }

    pub(crate) fn drop_link(&self, reason: &str) {
        let _ = self.tx.send(LinkEvent::Drop(reason.to_string()));
    }

    pub(crate) fn connects(&self) -> u32 {
        self.log.lock().unwrap().connects
    }

    pub(crate) fn subscribes(&self) -> Vec<String> {
        self.log.lock().unwrap().subscribes.clone()
    }

    pub(crate) fn acks(&self) -> Vec<DeliveryToken> {
        self.log.lock().unwrap().acks.clone()
    }

    pub(crate) fn disconnects(&self) -> u32 {
        self.log.lock().unwrap().disconnects
    }
}

impl BrokerLink for ScriptedLink {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.log.lock().unwrap().connects += 1;
        self.connect_results.pop_front().unwrap_or(Ok(()))
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.log.lock().unwrap().subscribes.push(topic.to_string());
        self.subscribe_results.pop_front().unwrap_or(Ok(()))
    }

    async fn next_message(&mut self) -> Result<RawMessage, TransportError> {
        match self.events.recv().await {
            Some(LinkEvent::Message(message)) => Ok(message),
            Some(LinkEvent::Drop(reason)) => Err(TransportError::LinkLoss { reason }),
            None => std::future::pending().await,
        }
    }

    async fn acknowledge(&mut self, token: DeliveryToken) -> Result<(), TransportError> {
        self.log.lock().unwrap().acks.push(token);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.log.lock().unwrap().disconnects += 1;
        tokio::time::sleep(self.disconnect_delay).await;
    }
}
