//! # meter-bridge
//!
//! `meter-bridge` relays JSON telemetry from a single MQTT topic to an HTTP
//! ingestion endpoint. Each payload is checked to be a JSON object and
//! POSTed unmodified; nothing is transformed or aggregated on the way.
//!
//! ## Pipeline
//!
//! transport -> decoder -> delivery queue -> forwarder, with every
//! undeliverable reading routed to the dead-letter path.
//!
//! - `transport`: broker connection state machine and the MQTT link.
//! - `decoder`: turns raw payloads into readings or rejects them.
//! - `queue`: the bounded buffer and its backpressure policy.
//! - `forwarder`: HTTP delivery with retry and backoff.
//! - `dead_letter`: records of readings that were not delivered.
//! - `bridge`: wires the pipeline together and owns shutdown.
//! - `config`: layered configuration from file and environment.
//! - `utils`: the top-level error, logging and backoff.

pub mod bridge;
pub mod config;
pub mod dead_letter;
pub mod decoder;
pub mod forwarder;
pub mod queue;
pub mod transport;
pub mod utils;
