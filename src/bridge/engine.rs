//! Ingest loop, worker pool and shutdown sequence.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::stats::{BridgeStats, StatsSnapshot};
use crate::config::Settings;
use crate::dead_letter::{DeadLetterEntry, DeadLetterReason, DeadLetterSink, DeadLetters};
use crate::decoder::{DecodedReading, decode};
use crate::forwarder::{ForwarderWorker, HttpForwarder, RetryPolicy};
use crate::queue::{BackpressurePolicy, DeliveryQueue, EnqueueError, Enqueued};
use crate::transport::{BrokerLink, Transport, TransportError};
use crate::utils::backoff::Backoff;
use crate::utils::error::BridgeError;

/// How long workers get to return once `abort` has fired.
const ABORT_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Bridge {
    settings: Settings,
    policy: BackpressurePolicy,
    forwarder: HttpForwarder,
    dead_letters: DeadLetters,
    stats: Arc<BridgeStats>,
}

impl Bridge {
    /// Validates `settings` and prepares the HTTP client.
    pub fn new(settings: Settings, sink: Arc<dyn DeadLetterSink>) -> Result<Self, BridgeError> {
        settings
            .validate()
            .map_err(|problems| config::ConfigError::Message(problems.join("; ")))?;
        let policy = settings.queue.backpressure.ok_or_else(|| {
            config::ConfigError::Message("queue.backpressure must be set".to_string())
        })?;

        let forwarder = HttpForwarder::new(&settings.sink, RetryPolicy::from(&settings.retry))?;
        let stats = Arc::new(BridgeStats::new());
        let dead_letters = DeadLetters::new(sink, stats.clone());

        Ok(Self {
            settings,
            policy,
            forwarder,
            dead_letters,
            stats,
        })
    }

    pub fn stats(&self) -> Arc<BridgeStats> {
        self.stats.clone()
    }

    /// Runs the pipeline until `shutdown` fires or the transport fails.
    ///
    /// Startup connect failures are returned before anything is consumed.
    /// A transport failure after startup still goes through the full
    /// shutdown sequence before being returned.
    pub async fn run<L: BrokerLink>(
        &self,
        link: L,
        shutdown: CancellationToken,
    ) -> Result<StatsSnapshot, BridgeError> {
        let broker = &self.settings.broker;
        let reconnect = &self.settings.reconnect;
        let mut transport = Transport::new(
            link,
            broker.topic.clone(),
            Backoff::from_millis(
                reconnect.initial_backoff_ms,
                reconnect.max_backoff_ms,
                reconnect.multiplier,
            ),
            broker.startup_connect_attempts,
        );

        let stop = shutdown.child_token();
        if !transport.start(&stop).await? {
            info!("shutdown requested before the broker link came up");
            return Ok(self.stats.snapshot());
        }

        let queue = Arc::new(DeliveryQueue::new(self.settings.queue.capacity, self.policy));
        // fires when the grace period runs out; cuts in-flight requests short
        let abort = CancellationToken::new();

        let mut workers = JoinSet::new();
        for worker_id in 0..self.settings.forwarder.concurrency.max(1) {
            let worker = ForwarderWorker {
                id: worker_id,
                queue: queue.clone(),
                forwarder: self.forwarder.clone(),
                dead_letters: self.dead_letters.clone(),
                stats: self.stats.clone(),
                shutdown: stop.clone(),
                abort: abort.clone(),
                drain_on_shutdown: self.settings.shutdown.drain_on_shutdown,
            };
            workers.spawn(worker.run());
        }
        info!(
            topic = %transport.topic(),
            sink = %self.forwarder.url(),
            workers = workers.len(),
            capacity = queue.capacity(),
            policy = ?self.policy,
            "bridge running"
        );

        let result = self.ingest(&mut transport, &queue, &stop).await;
        if let Err(err) = &result {
            error!(error = %err, "transport failed, shutting down");
        }
        stop.cancel();

        self.shut_down(&mut transport, &queue, &mut workers, &abort)
            .await;

        let snapshot = self.stats.snapshot();
        info!(
            received = snapshot.received,
            delivered = snapshot.delivered,
            dead_lettered = snapshot.dead_lettered,
            retries = snapshot.retries,
            reconnects = snapshot.reconnects,
            "bridge stopped"
        );
        result?;
        Ok(snapshot)
    }

    /// Moves messages from the transport into the queue until `stop` fires.
    ///
    /// Each message is acknowledged once it is either queued or
    /// dead-lettered.
    async fn ingest<L: BrokerLink>(
        &self,
        transport: &mut Transport<L>,
        queue: &DeliveryQueue,
        stop: &CancellationToken,
    ) -> Result<(), TransportError> {
        let mut sequence: u64 = 0;

        while let Some(raw) = transport.next_message(stop).await? {
            self.stats.record_received();
            self.stats.set_reconnects(transport.reconnects());
            let token = raw.token;
            sequence += 1;

            match decode(raw, sequence) {
                Ok(reading) => self.admit(reading, queue, stop).await,
                Err(err) => {
                    self.stats.record_malformed();
                    warn!(sequence, error = %err, "dropping malformed payload to dead letters");
                    let reason = DeadLetterReason::MalformedPayload {
                        detail: err.reason().to_string(),
                    };
                    self.dead_letters
                        .route(DeadLetterEntry::from_raw(err.into_raw(), reason));
                }
            }

            transport.acknowledge(token).await;
        }

        Ok(())
    }

    /// Hands a reading to the queue, applying the backpressure policy.
    async fn admit(&self, mut reading: DecodedReading, queue: &DeliveryQueue, stop: &CancellationToken) {
        loop {
            match queue.enqueue(reading) {
                Ok(Enqueued::Accepted) => {
                    self.stats.record_enqueued();
                    return;
                }
                Ok(Enqueued::Evicted(oldest)) => {
                    self.stats.record_enqueued();
                    self.stats.record_evicted();
                    warn!(
                        reading_id = %oldest.id,
                        sequence = oldest.sequence,
                        capacity = queue.capacity(),
                        "queue full, evicted oldest reading"
                    );
                    self.dead_letters.route(DeadLetterEntry::from_reading(
                        oldest,
                        DeadLetterReason::Evicted {
                            queue_capacity: queue.capacity(),
                        },
                        Vec::new(),
                    ));
                    return;
                }
                Err(EnqueueError::QueueFull(rejected)) => {
                    self.stats.record_backpressure_wait();
                    debug!(sequence = rejected.sequence, "queue full, pausing ingest");
                    let freed = tokio::select! {
                        biased;
                        _ = stop.cancelled() => false,
                        _ = queue.wait_for_capacity() => true,
                    };
                    if !freed {
                        self.shutdown_letter(rejected, "shutdown while waiting for queue capacity");
                        return;
                    }
                    reading = rejected;
                }
                Err(EnqueueError::Closed(rejected)) => {
                    self.shutdown_letter(rejected, "queue closed");
                    return;
                }
            }
        }
    }

    async fn shut_down<L: BrokerLink>(
        &self,
        transport: &mut Transport<L>,
        queue: &DeliveryQueue,
        workers: &mut JoinSet<()>,
        abort: &CancellationToken,
    ) {
        let grace = Duration::from_secs(self.settings.shutdown.grace_period_secs);
        let deadline = Instant::now() + grace;
        info!(grace_secs = grace.as_secs(), "shutting down");

        // queued readings are settled before the broker gets any time
        queue.close();
        if !self.settings.shutdown.drain_on_shutdown {
            let pending = queue.take_all();
            if !pending.is_empty() {
                info!(count = pending.len(), "dead-lettering queued readings");
            }
            for reading in pending {
                self.shutdown_letter(reading, "queued at shutdown");
            }
        }

        if timeout_at(deadline, transport.disconnect()).await.is_err() {
            warn!("broker disconnect did not finish within the grace period");
        }
        self.stats.set_reconnects(transport.reconnects());

        if timeout_at(deadline, join_workers(workers)).await.is_err() {
            warn!("grace period expired, aborting in-flight deliveries");
            abort.cancel();
            if timeout(ABORT_JOIN_TIMEOUT, join_workers(workers)).await.is_err() {
                error!(remaining = workers.len(), "forcing forwarder workers to stop");
                workers.abort_all();
                join_workers(workers).await;
            }
        }

        for reading in queue.take_all() {
            self.shutdown_letter(reading, "grace period expired before delivery");
        }
        self.dead_letters.flush();
    }

    fn shutdown_letter(&self, reading: DecodedReading, detail: &str) {
        self.dead_letters.route(DeadLetterEntry::from_reading(
            reading,
            DeadLetterReason::Shutdown {
                detail: detail.to_string(),
            },
            Vec::new(),
        ));
    }
}

async fn join_workers(workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.join_next().await {
        if let Err(err) = joined {
            if err.is_panic() {
                error!(error = %err, "forwarder worker panicked");
            }
        }
    }
}
