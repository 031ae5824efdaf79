//! Payload decoding.
//!
//! Turns a [`RawMessage`] into a [`DecodedReading`]: the payload must be a
//! UTF-8 JSON object. The decoder is a pure function; it never performs I/O
//! and keeps no state. Rejected payloads carry their bytes back so the
//! caller can dead-letter them verbatim.

use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::transport::RawMessage;

pub type Document = Map<String, Value>;

/// A validated telemetry document together with the message it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReading {
    pub id: Uuid,
    /// Decode order, assigned by the ingest loop.
    pub sequence: u64,
    pub document: Document,
    pub raw: RawMessage,
}

impl DecodedReading {
    /// The HTTP body to relay: the original payload with surrounding
    /// whitespace removed.
    pub fn body(&self) -> &[u8] {
        self.raw.payload.trim_ascii()
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed payload on '{topic}': {reason}")]
    MalformedPayload {
        topic: String,
        reason: String,
        raw: RawMessage,
    },
}

impl DecodeError {
    pub fn into_raw(self) -> RawMessage {
        match self {
            DecodeError::MalformedPayload { raw, .. } => raw,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            DecodeError::MalformedPayload { reason, .. } => reason,
        }
    }
}

/// Decodes a raw payload into a reading with the given sequence number.
pub fn decode(raw: RawMessage, sequence: u64) -> Result<DecodedReading, DecodeError> {
    let trimmed = raw.payload.trim_ascii();
    if trimmed.is_empty() {
        return Err(malformed(raw, "empty payload".to_string()));
    }

    let text = match std::str::from_utf8(trimmed) {
        Ok(text) => text,
        Err(err) => return Err(malformed(raw, format!("invalid UTF-8: {err}"))),
    };

    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => return Err(malformed(raw, format!("invalid JSON: {err}"))),
    };

    match value {
        Value::Object(document) => Ok(DecodedReading {
            id: Uuid::new_v4(),
            sequence,
            document,
            raw,
        }),
        other => {
            let kind = json_kind(&other);
            Err(malformed(raw, format!("expected a JSON object, got {kind}")))
        }
    }
}

fn malformed(raw: RawMessage, reason: String) -> DecodeError {
    DecodeError::MalformedPayload {
        topic: raw.topic.clone(),
        reason,
        raw,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
