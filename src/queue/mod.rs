//! The delivery queue decouples the broker's arrival rate from the sink's
//! delivery rate.
//!
//! It is the only structure shared between the ingest loop and the
//! forwarder workers. Capacity is fixed at construction; what happens when
//! it is reached is decided by an explicit [`BackpressurePolicy`].

pub mod delivery_queue;

pub use delivery_queue::{BackpressurePolicy, DeliveryQueue, EnqueueError, Enqueued};

#[cfg(test)]
mod tests;
