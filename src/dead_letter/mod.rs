//! The dead-letter path.
//!
//! Every reading the bridge cannot deliver ends here instead of being
//! dropped: malformed payloads, readings the sink rejected, readings whose
//! retries ran out, readings evicted by backpressure and readings still
//! queued at shutdown. Entries are written to an append-only
//! [`DeadLetterSink`]; what happens to them afterwards is up to the
//! operator.

pub mod entry;
pub mod sinks;
pub mod sled_store;

use std::sync::Arc;

use thiserror::Error;
use tracing::error;

use crate::bridge::stats::BridgeStats;
use crate::config::{DeadLetterKind, DeadLetterSettings};

pub use entry::{DeadLetterEntry, DeadLetterReason};
pub use sinks::{JsonLinesSink, LogSink, MemorySink};
pub use sled_store::SledDeadLetterStore;

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("dead-letter I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dead-letter store error: {0}")]
    Sled(#[from] sled::Error),
    #[error("failed to serialize dead-letter entry: {0}")]
    Json(#[from] serde_json::Error),
    #[error("dead-letter sink '{0}' requires a path")]
    MissingPath(&'static str),
}

/// Append-only destination for dead-letter entries.
pub trait DeadLetterSink: Send + Sync {
    fn record(&self, entry: &DeadLetterEntry) -> Result<(), DeadLetterError>;

    fn flush(&self) -> Result<(), DeadLetterError> {
        Ok(())
    }
}

/// Opens the sink selected in configuration.
pub fn open_sink(settings: &DeadLetterSettings) -> Result<Arc<dyn DeadLetterSink>, DeadLetterError> {
    let sink: Arc<dyn DeadLetterSink> = match settings.kind {
        DeadLetterKind::Log => Arc::new(LogSink),
        DeadLetterKind::File => {
            let path = settings.path.as_ref().ok_or(DeadLetterError::MissingPath("file"))?;
            Arc::new(JsonLinesSink::open(path)?)
        }
        DeadLetterKind::Sled => {
            let path = settings.path.as_ref().ok_or(DeadLetterError::MissingPath("sled"))?;
            Arc::new(SledDeadLetterStore::open(path, settings.max_entries)?)
        }
    };
    Ok(sink)
}

/// Counts and forwards entries to the configured sink.
///
/// A failing sink never loses an entry: it is logged in full instead.
#[derive(Clone)]
pub struct DeadLetters {
    sink: Arc<dyn DeadLetterSink>,
    stats: Arc<BridgeStats>,
}

impl DeadLetters {
    pub fn new(sink: Arc<dyn DeadLetterSink>, stats: Arc<BridgeStats>) -> Self {
        Self { sink, stats }
    }

    pub fn route(&self, entry: DeadLetterEntry) {
        self.stats.record_dead_letter();
        if let Err(err) = self.sink.record(&entry) {
            let json = serde_json::to_string(&entry).unwrap_or_else(|_| format!("{entry:?}"));
            error!(
                error = %err,
                reading_id = ?entry.reading_id,
                kind = entry.reason.kind(),
                entry = %json,
                "dead-letter sink failed, entry logged instead"
            );
        }
    }

    pub fn flush(&self) {
        if let Err(err) = self.sink.flush() {
            error!(error = %err, "failed to flush dead-letter sink");
        }
    }
}
