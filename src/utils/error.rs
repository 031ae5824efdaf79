//! The top-level error returned by the bridge and reported by the binary.
//!
//! Component errors stay in their modules; this type only gathers the ones
//! that can abort a run.

use thiserror::Error;

use crate::dead_letter::DeadLetterError;
use crate::forwarder::ForwarderError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("broker transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("forwarder setup failed: {0}")]
    Forwarder(#[from] ForwarderError),
    #[error("dead-letter sink failed: {0}")]
    DeadLetter(#[from] DeadLetterError),
}
