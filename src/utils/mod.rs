//! The `utils` module provides shared building blocks used across the
//! bridge: the top-level error type, tracing setup, and the exponential
//! backoff schedule used by both broker reconnection and delivery retries.

pub mod backoff;
pub mod error;
pub mod logging;

#[cfg(test)]
mod tests;
