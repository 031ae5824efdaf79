//! Dead-letter records.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decoder::{DecodedReading, Document};
use crate::forwarder::DeliveryAttempt;
use crate::transport::RawMessage;

/// Why a reading was dead-lettered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeadLetterReason {
    MalformedPayload { detail: String },
    PermanentFailure { status: u16, detail: String },
    RetriesExhausted { attempts: u32, last_error: String },
    Evicted { queue_capacity: usize },
    Shutdown { detail: String },
}

impl DeadLetterReason {
    pub fn kind(&self) -> &'static str {
        match self {
            DeadLetterReason::MalformedPayload { .. } => "malformed_payload",
            DeadLetterReason::PermanentFailure { .. } => "permanent_failure",
            DeadLetterReason::RetriesExhausted { .. } => "retries_exhausted",
            DeadLetterReason::Evicted { .. } => "evicted",
            DeadLetterReason::Shutdown { .. } => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Absent for payloads that never decoded.
    pub reading_id: Option<Uuid>,
    pub sequence: Option<u64>,
    pub topic: String,
    /// Original payload bytes, base64 encoded.
    pub payload_base64: String,
    /// The same bytes as text, when they are valid UTF-8.
    pub payload_text: Option<String>,
    pub document: Option<Document>,
    pub reason: DeadLetterReason,
    pub attempts: Vec<DeliveryAttempt>,
    pub received_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn from_reading(
        reading: DecodedReading,
        reason: DeadLetterReason,
        attempts: Vec<DeliveryAttempt>,
    ) -> Self {
        let mut entry = Self::from_raw(reading.raw, reason);
        entry.reading_id = Some(reading.id);
        entry.sequence = Some(reading.sequence);
        entry.document = Some(reading.document);
        entry.attempts = attempts;
        entry
    }

    pub fn from_raw(raw: RawMessage, reason: DeadLetterReason) -> Self {
        Self {
            reading_id: None,
            sequence: None,
            topic: raw.topic,
            payload_base64: STANDARD.encode(&raw.payload),
            payload_text: String::from_utf8(raw.payload).ok(),
            document: None,
            reason,
            attempts: Vec::new(),
            received_at: raw.received_at,
            recorded_at: Utc::now(),
        }
    }

    /// The original payload bytes.
    pub fn payload(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.payload_base64)
    }
}
