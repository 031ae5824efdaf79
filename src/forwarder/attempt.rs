use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Network failure, timeout or 5xx: worth retrying.
    #[error("transient delivery failure: {reason}")]
    Transient { status: Option<u16>, reason: String },
    /// The sink rejected the content; resubmitting cannot help.
    #[error("sink rejected reading with HTTP {status}: {reason}")]
    Permanent { status: u16, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Delivered { status: u16 },
    TransientFailure { status: Option<u16>, reason: String },
    PermanentFailure { status: u16, reason: String },
}

/// One try at delivering a reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub endpoint: String,
    /// 1-based.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub at: DateTime<Utc>,
}

impl DeliveryAttempt {
    pub fn new(endpoint: &str, attempt: u32, result: &Result<u16, DeliveryError>) -> Self {
        let outcome = match result {
            Ok(status) => AttemptOutcome::Delivered { status: *status },
            Err(DeliveryError::Transient { status, reason }) => AttemptOutcome::TransientFailure {
                status: *status,
                reason: reason.clone(),
            },
            Err(DeliveryError::Permanent { status, reason }) => AttemptOutcome::PermanentFailure {
                status: *status,
                reason: reason.clone(),
            },
        };
        Self {
            endpoint: endpoint.to_string(),
            attempt,
            outcome,
            at: Utc::now(),
        }
    }
}
