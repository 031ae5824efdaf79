//! Drain-and-deliver loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::http::{DeliveryOutcome, HttpForwarder};
use crate::bridge::stats::BridgeStats;
use crate::dead_letter::{DeadLetterEntry, DeadLetterReason, DeadLetters};
use crate::decoder::DecodedReading;
use crate::queue::DeliveryQueue;

/// One forwarder worker and everything it shares with the bridge.
pub struct ForwarderWorker {
    pub id: usize,
    pub queue: Arc<DeliveryQueue>,
    pub forwarder: HttpForwarder,
    pub dead_letters: DeadLetters,
    pub stats: Arc<BridgeStats>,
    /// Stops retries; without `drain_on_shutdown` it also stops first attempts.
    pub shutdown: CancellationToken,
    /// Fires when the shutdown grace period has run out.
    pub abort: CancellationToken,
    pub drain_on_shutdown: bool,
}

impl ForwarderWorker {
    /// Runs until the queue is closed and drained.
    ///
    /// Every dequeued reading ends as either a delivery or a dead letter,
    /// including when the task itself is cancelled mid-delivery.
    pub async fn run(self) {
        let worker_id = self.id;
        debug!(worker_id, "forwarder worker started");

        while let Some(reading) = self.queue.dequeue().await {
            let mut held = Held::new(&self.dead_letters, reading);

            let discard = if self.abort.is_cancelled() {
                Some("grace period expired before delivery")
            } else if self.shutdown.is_cancelled() && !self.drain_on_shutdown {
                Some("dequeued after shutdown")
            } else {
                None
            };
            if let Some(detail) = discard {
                if let Some(reading) = held.release() {
                    self.shutdown_letter(reading, detail);
                }
                continue;
            }

            let Some(current) = held.reading.as_ref() else {
                continue;
            };
            let report = self
                .forwarder
                .deliver_with_retry(current, &self.shutdown, &self.abort)
                .await;
            let Some(reading) = held.release() else {
                continue;
            };
            self.stats.record_attempts(report.attempts.len() as u64);

            match report.outcome {
                DeliveryOutcome::Delivered { status } => {
                    self.stats.record_delivered();
                    debug!(
                        worker_id,
                        reading_id = %reading.id,
                        sequence = reading.sequence,
                        status,
                        attempts = report.attempts.len(),
                        "reading delivered"
                    );
                }
                DeliveryOutcome::DeadLetter(reason) => {
                    if matches!(reason, DeadLetterReason::PermanentFailure { .. }) {
                        self.stats.record_permanent_failure();
                    }
                    self.dead_letters.route(DeadLetterEntry::from_reading(
                        reading,
                        reason,
                        report.attempts,
                    ));
                }
            }
        }

        info!(worker_id, "forwarder worker stopped");
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

/// A reading taken off the queue and not yet settled.
///
/// Dropping it unreleased (the worker task was aborted) records a
/// `shutdown` dead letter.
struct Held<'a> {
    dead_letters: &'a DeadLetters,
    reading: Option<DecodedReading>,
}

impl<'a> Held<'a> {
    fn new(dead_letters: &'a DeadLetters, reading: DecodedReading) -> Self {
        Self {
            dead_letters,
            reading: Some(reading),
        }
    }

    fn release(&mut self) -> Option<DecodedReading> {
        self.reading.take()
    }
}

impl Drop for Held<'_> {
    fn drop(&mut self) {
        if let Some(reading) = self.reading.take() {
            warn!(reading_id = %reading.id, "worker cancelled mid-delivery");
            self.dead_letters.route(DeadLetterEntry::from_reading(
                reading,
                DeadLetterReason::Shutdown {
                    detail: "worker cancelled mid-delivery".to_string(),
                },
                Vec::new(),
            ));
        }
    }
}
