//! The bridge wires transport, decoder, queue, forwarder and dead letters
//! into one pipeline and owns its shutdown.

pub mod engine;
pub mod stats;

pub use engine::Bridge;
pub use stats::{BridgeStats, StatsSnapshot};
