//! Simple dead-letter sinks: tracing, JSON Lines file, and in-memory.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use tracing::error;

use super::{DeadLetterEntry, DeadLetterError, DeadLetterSink};

/// Writes each entry as an ERROR event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DeadLetterSink for LogSink {
    fn record(&self, entry: &DeadLetterEntry) -> Result<(), DeadLetterError> {
        let json = serde_json::to_string(entry)?;
        error!(
            reading_id = ?entry.reading_id,
            topic = %entry.topic,
            kind = entry.reason.kind(),
            attempts = entry.attempts.len(),
            entry = %json,
            "dead letter"
        );
        Ok(())
    }
}

/// Appends one JSON document per line to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    file: Mutex<File>,
}

impl JsonLinesSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeadLetterError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl DeadLetterSink for JsonLinesSink {
    fn record(&self, entry: &DeadLetterEntry) -> Result<(), DeadLetterError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        // one write per entry keeps lines whole under O_APPEND
        file.write_all(&line)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), DeadLetterError> {
        let file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.sync_data()?;
        Ok(())
    }
}

/// Keeps entries in memory. Useful when embedding the bridge and in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeadLetterSink for MemorySink {
    fn record(&self, entry: &DeadLetterEntry) -> Result<(), DeadLetterError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }
}
