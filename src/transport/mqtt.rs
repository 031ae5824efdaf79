//! MQTT implementation of [`BrokerLink`] on top of `rumqttc`.
//!
//! `rumqttc` splits a client into an `AsyncClient` (request handle) and an
//! `EventLoop` that performs all network I/O when polled. Each connection
//! gets its own network task that owns the event loop and polls it without
//! pause, so keep-alive pings and queued acks go out while the bridge is
//! held back by a full delivery queue. Received packets are handed over
//! through a bounded channel; the task stops reading the socket only once
//! `inbound_buffer` packets are waiting.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, Publish, QoS, SubAck, SubscribeReasonCode, TlsConfiguration,
    Transport as MqttTransport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::link::{BrokerLink, TransportError};
use super::message::{DeliveryToken, RawMessage};
use crate::config::BrokerSettings;

const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// What the network task reports back to the link.
#[derive(Debug)]
enum Inbound {
    ConnAck(ConnectReturnCode),
    SubAck(SubAck),
    Publish(Publish),
    Refused(ConnectReturnCode),
    Lost(String),
}

/// A running network task for one connection.
struct Driver {
    client: AsyncClient,
    inbound: mpsc::Receiver<Inbound>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct MqttLink {
    options: MqttOptions,
    request_capacity: usize,
    inbound_buffer: usize,
    qos: QoS,
    connect_timeout: Duration,
    driver: Option<Driver>,
    pending: VecDeque<Publish>,
}

impl MqttLink {
    /// Builds the client options from settings, reading TLS material from disk.
    ///
    /// No network traffic happens until [`BrokerLink::connect`].
    pub fn from_settings(settings: &BrokerSettings) -> Result<Self, TransportError> {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
        options.set_clean_session(true);

        let qos = qos_from_level(settings.qos);
        // acks are released by the bridge after the reading is safe
        options.set_manual_acks(qos != QoS::AtMostOnce);

        if let Some(username) = &settings.username {
            options.set_credentials(username, settings.password.clone().unwrap_or_default());
        }

        if let Some(ca_path) = &settings.ca_cert {
            let ca = read_tls_file(ca_path)?;
            let client_auth = match (&settings.client_cert, &settings.client_key) {
                (Some(cert), Some(key)) => Some((read_tls_file(cert)?, read_tls_file(key)?)),
                _ => None,
            };
            options.set_transport(MqttTransport::tls_with_config(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth,
            }));
        }

        Ok(Self {
            options,
            request_capacity: settings.request_channel_capacity.max(1),
            inbound_buffer: settings.inbound_buffer.max(1),
            qos,
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs.max(1)),
            driver: None,
            pending: VecDeque::new(),
        })
    }

    fn to_raw(publish: Publish) -> RawMessage {
        let token = (publish.qos != QoS::AtMostOnce).then_some(DeliveryToken {
            packet_id: publish.pkid,
            qos: publish.qos as u8,
        });
        RawMessage {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
            received_at: Utc::now(),
            token,
        }
    }

    fn spawn_driver(&mut self) {
        let (client, eventloop) = AsyncClient::new(self.options.clone(), self.request_capacity);
        let (tx, inbound) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(drive(eventloop, tx, self.inbound_buffer, cancel.clone()));
        self.driver = Some(Driver {
            client,
            inbound,
            cancel,
            handle,
        });
    }

    /// Next report from the network task; `None` once it has stopped.
    async fn recv(&mut self) -> Option<Inbound> {
        match self.driver.as_mut() {
            Some(driver) => driver.inbound.recv().await,
            None => None,
        }
    }

    async fn await_connack(&mut self) -> Result<(), TransportError> {
        loop {
            match self.recv().await {
                Some(Inbound::ConnAck(ConnectReturnCode::Success)) => return Ok(()),
                Some(Inbound::ConnAck(code)) | Some(Inbound::Refused(code)) => {
                    return Err(TransportError::ConnectRefused {
                        reason: format!("{code:?}"),
                    });
                }
                Some(Inbound::Publish(publish)) => self.pending.push_back(publish),
                Some(Inbound::SubAck(_)) => {}
                Some(Inbound::Lost(reason)) => return Err(TransportError::ConnectFailure { reason }),
                None => {
                    return Err(TransportError::ConnectFailure {
                        reason: "network task stopped".to_string(),
                    });
                }
            }
        }
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.driver
            .as_ref()
            .map(|driver| &driver.client)
            .ok_or(TransportError::NotConnected)
    }
}

impl BrokerLink for MqttLink {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.driver = None;
        self.pending.clear();
        self.spawn_driver();

        let timeout = self.connect_timeout;
        let result = match tokio::time::timeout(timeout, self.await_connack()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectFailure {
                reason: format!("no CONNACK within {}s", timeout.as_secs()),
            }),
        };
        if result.is_err() {
            self.driver = None;
        }
        result
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client()?
            .subscribe(topic, self.qos)
            .await
            .map_err(|err| TransportError::SubscribeFailure {
                topic: topic.to_string(),
                reason: err.to_string(),
            })?;

        loop {
            match self.recv().await {
                Some(Inbound::SubAck(ack)) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        return Err(TransportError::SubscribeFailure {
                            topic: topic.to_string(),
                            reason: "broker rejected subscription".to_string(),
                        });
                    }
                    debug!(topic, pkid = ack.pkid, "SUBACK received");
                    return Ok(());
                }
                Some(Inbound::Publish(publish)) => self.pending.push_back(publish),
                Some(Inbound::ConnAck(_)) => {}
                Some(Inbound::Refused(code)) => {
                    self.driver = None;
                    return Err(TransportError::LinkLoss {
                        reason: format!("{code:?}"),
                    });
                }
                Some(Inbound::Lost(reason)) => {
                    self.driver = None;
                    return Err(TransportError::LinkLoss { reason });
                }
                None => {
                    self.driver = None;
                    return Err(TransportError::LinkLoss {
                        reason: "network task stopped".to_string(),
                    });
                }
            }
        }
    }

    async fn next_message(&mut self) -> Result<RawMessage, TransportError> {
        if let Some(publish) = self.pending.pop_front() {
            return Ok(Self::to_raw(publish));
        }
        if self.driver.is_none() {
            return Err(TransportError::NotConnected);
        }

        loop {
            match self.recv().await {
                Some(Inbound::Publish(publish)) => return Ok(Self::to_raw(publish)),
                Some(Inbound::ConnAck(_)) | Some(Inbound::SubAck(_)) => {}
                Some(Inbound::Refused(code)) => {
                    self.driver = None;
                    return Err(TransportError::LinkLoss {
                        reason: format!("{code:?}"),
                    });
                }
                Some(Inbound::Lost(reason)) => {
                    self.driver = None;
                    return Err(TransportError::LinkLoss { reason });
                }
                None => {
                    self.driver = None;
                    return Err(TransportError::LinkLoss {
                        reason: "network task stopped".to_string(),
                    });
                }
            }
        }
    }

    async fn acknowledge(&mut self, token: DeliveryToken) -> Result<(), TransportError> {
        let mut publish = Publish::new(String::new(), qos_from_level(token.qos), Vec::new());
        publish.pkid = token.packet_id;
        self.client()?
            .ack(&publish)
            .await
            .map_err(|err| TransportError::LinkLoss {
                reason: err.to_string(),
            })
    }

    async fn disconnect(&mut self) {
        let Some(mut driver) = self.driver.take() else {
            return;
        };
        self.pending.clear();
        // closing the channel lets a stalled task drop its backlog and keep polling
        driver.inbound.close();
        if driver.client.disconnect().await.is_err() {
            return;
        }
        if tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, &mut driver.handle)
            .await
            .is_err()
        {
            debug!("DISCONNECT not flushed in time");
        }
    }
}

/// Polls the event loop until the connection ends or `cancel` fires.
///
/// Packets the link has not taken yet wait in a local backlog. Socket reads
/// pause while `limit` packets are waiting; everything already queued on
/// the client (acks, pings, DISCONNECT) keeps moving until then.
async fn drive(
    mut eventloop: EventLoop,
    tx: mpsc::Sender<Inbound>,
    limit: usize,
    cancel: CancellationToken,
) {
    let mut backlog: VecDeque<Inbound> = VecDeque::new();
    let mut receiver_open = true;

    let last = loop {
        // one poll future per event, so a hand-over never drops a half-read packet
        let event = {
            let poll = eventloop.poll();
            tokio::pin!(poll);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    permit = tx.reserve(), if receiver_open && !backlog.is_empty() => match permit {
                        Ok(permit) => {
                            if let Some(item) = backlog.pop_front() {
                                permit.send(item);
                            }
                        }
                        Err(_) => {
                            receiver_open = false;
                            backlog.clear();
                        }
                    },
                    event = &mut poll, if backlog.len() < limit => break event,
                }
            }
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => backlog.push_back(Inbound::ConnAck(ack.code)),
            Ok(Event::Incoming(Packet::SubAck(ack))) => backlog.push_back(Inbound::SubAck(ack)),
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if receiver_open {
                    backlog.push_back(Inbound::Publish(publish));
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                break Inbound::Lost("broker sent DISCONNECT".to_string());
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => return,
            Ok(event) => trace!(?event, "network event"),
            Err(ConnectionError::ConnectionRefused(code)) => break Inbound::Refused(code),
            Err(err) => break Inbound::Lost(err.to_string()),
        }
    };

    if !receiver_open {
        return;
    }
    if let Inbound::Lost(reason) = &last {
        warn!(%reason, "broker connection ended");
    }
    backlog.push_back(last);
    while let Some(item) = backlog.pop_front() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            permit = tx.reserve() => match permit {
                Ok(permit) => permit.send(item),
                Err(_) => return,
            },
        }
    }
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

fn read_tls_file(path: &std::path::Path) -> Result<Vec<u8>, TransportError> {
    std::fs::read(path).map_err(|source| TransportError::Tls {
        path: path.display().to_string(),
        source,
    })
}
