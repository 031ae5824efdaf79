//! The forwarder drains the delivery queue and relays each reading to the
//! HTTP ingestion endpoint.
//!
//! - `attempt`: the record of one delivery try and the failure taxonomy
//! - `http`: the single-attempt POST, status classification and the retry loop
//! - `worker`: the drain-and-deliver task run by the bridge

pub mod attempt;
pub mod http;
pub mod worker;

pub use attempt::{AttemptOutcome, DeliveryAttempt, DeliveryError};
pub use http::{DeliveryOutcome, DeliveryReport, ForwarderError, HttpForwarder, RetryPolicy};
pub use worker::ForwarderWorker;
