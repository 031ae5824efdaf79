use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;

use crate::decoder::DecodedReading;

/// What a full queue does with the next reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Refuse the reading and hand it back; the producer decides whether to
    /// wait (and stop reading from the broker) or give up.
    Reject,
    /// Make room by evicting the oldest queued reading, which the producer
    /// must dead-letter.
    EvictOldest,
}

/// Successful enqueue.
#[derive(Debug)]
pub enum Enqueued {
    Accepted,
    /// Accepted after evicting the oldest reading.
    Evicted(DecodedReading),
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("delivery queue is full")]
    QueueFull(DecodedReading),
    #[error("delivery queue is closed")]
    Closed(DecodedReading),
}

impl EnqueueError {
    pub fn into_reading(self) -> DecodedReading {
        match self {
            EnqueueError::QueueFull(reading) | EnqueueError::Closed(reading) => reading,
        }
    }
}

#[derive(Debug)]
struct Inner {
    items: VecDeque<DecodedReading>,
    closed: bool,
}

/// Bounded FIFO of decoded readings.
///
/// `enqueue` never blocks; `dequeue` suspends while the queue is empty and
/// open. After `close`, consumers drain what is left and then receive
/// `None`.
#[derive(Debug)]
pub struct DeliveryQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    policy: BackpressurePolicy,
    not_empty: Notify,
    not_full: Notify,
}

impl DeliveryQueue {
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            policy,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn enqueue(&self, reading: DecodedReading) -> Result<Enqueued, EnqueueError> {
        let outcome = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(EnqueueError::Closed(reading));
            }

            if inner.items.len() < self.capacity {
                inner.items.push_back(reading);
                Enqueued::Accepted
            } else {
                match self.policy {
                    BackpressurePolicy::Reject => return Err(EnqueueError::QueueFull(reading)),
                    BackpressurePolicy::EvictOldest => {
                        // len == capacity >= 1, so there is a front element
                        let Some(oldest) = inner.items.pop_front() else {
                            return Err(EnqueueError::QueueFull(reading));
                        };
                        inner.items.push_back(reading);
                        Enqueued::Evicted(oldest)
                    }
                }
            }
        };

        self.not_empty.notify_one();
        Ok(outcome)
    }

    /// Takes the oldest reading, waiting while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<DecodedReading> {
        loop {
            let notified = self.not_empty.notified();
            {
                let mut inner = self.lock();
                if let Some(reading) = inner.items.pop_front() {
                    let more = !inner.items.is_empty();
                    drop(inner);
                    self.not_full.notify_one();
                    if more {
                        // pass the wakeup on so a second consumer is not left waiting
                        self.not_empty.notify_one();
                    }
                    return Some(reading);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Waits until at least one slot is free or the queue is closed.
    pub async fn wait_for_capacity(&self) {
        loop {
            let notified = self.not_full.notified();
            {
                let inner = self.lock();
                if inner.closed || inner.items.len() < self.capacity {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Refuses further enqueues and wakes every waiter.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Removes and returns every queued reading in FIFO order.
    pub fn take_all(&self) -> Vec<DecodedReading> {
        let drained: Vec<_> = self.lock().items.drain(..).collect();
        self.not_full.notify_waiters();
        drained
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
