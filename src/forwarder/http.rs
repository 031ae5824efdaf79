//! HTTP delivery with retry.
//!
//! Classification of a single attempt:
//! - 2xx: delivered
//! - 4xx: permanent failure, never retried
//! - 5xx, connect errors, timeouts and other transport errors: transient
//! - anything else (unfollowed 3xx, 1xx): permanent
//!
//! Transient failures are retried with capped exponential backoff until the
//! attempt budget is spent. Attempts for one reading are strictly
//! sequential.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::attempt::{DeliveryAttempt, DeliveryError};
use crate::config::{RetrySettings, SinkSettings};
use crate::dead_letter::DeadLetterReason;
use crate::decoder::DecodedReading;
use crate::utils::backoff::Backoff;

/// Longest response body excerpt kept in failure reasons.
const REASON_BODY_LIMIT: usize = 256;

#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("invalid sink URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid sink header: {0}")]
    InvalidHeader(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per reading, including the first.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff: Backoff::from_millis(
                settings.initial_backoff_ms,
                settings.max_backoff_ms,
                settings.multiplier,
            ),
        }
    }
}

/// Terminal result for one reading.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered { status: u16 },
    DeadLetter(DeadLetterReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub outcome: DeliveryOutcome,
    pub attempts: Vec<DeliveryAttempt>,
}

#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: Client,
    url: Url,
    retry: RetryPolicy,
}

impl HttpForwarder {
    pub fn new(sink: &SinkSettings, retry: RetryPolicy) -> Result<Self, ForwarderError> {
        let url = Url::parse(&sink.url).map_err(|err| ForwarderError::InvalidUrl {
            url: sink.url.clone(),
            reason: err.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = &sink.api_key {
            let name = HeaderName::from_bytes(sink.api_key_header.as_bytes())
                .map_err(|err| ForwarderError::InvalidHeader(err.to_string()))?;
            let mut value = HeaderValue::from_str(api_key)
                .map_err(|err| ForwarderError::InvalidHeader(err.to_string()))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(sink.timeout_secs.max(1)))
            .default_headers(headers)
            .build()?;

        Ok(Self { client, url, retry })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Issues a single POST and classifies the response.
    pub async fn deliver(&self, reading: &DecodedReading) -> Result<u16, DeliveryError> {
        debug!(
            reading_id = %reading.id,
            sequence = reading.sequence,
            url = %self.url,
            "posting reading"
        );

        let response = self
            .client
            .post(self.url.clone())
            .body(reading.body().to_vec())
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(status.as_u16());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    /// Delivers a reading, retrying transient failures.
    ///
    /// `shutdown` stops further retries once the current attempt finishes.
    /// `abort` cuts the current attempt short; it fires only when the
    /// shutdown grace period has run out.
    pub async fn deliver_with_retry(
        &self,
        reading: &DecodedReading,
        shutdown: &CancellationToken,
        abort: &CancellationToken,
    ) -> DeliveryReport {
        let endpoint = self.url.as_str();
        let mut attempts = Vec::new();
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let result = tokio::select! {
                biased;
                _ = abort.cancelled() => None,
                res = self.deliver(reading) => Some(res),
            };
            let Some(result) = result else {
                return report(
                    shutdown_reason("grace period expired during delivery"),
                    attempts,
                );
            };
            attempts.push(DeliveryAttempt::new(endpoint, attempt, &result));

            let reason = match result {
                Ok(status) => return report(DeliveryOutcome::Delivered { status }, attempts),
                Err(DeliveryError::Permanent { status, reason }) => {
                    warn!(reading_id = %reading.id, status, "sink rejected reading");
                    return report(
                        DeliveryOutcome::DeadLetter(DeadLetterReason::PermanentFailure {
                            status,
                            detail: reason,
                        }),
                        attempts,
                    );
                }
                Err(DeliveryError::Transient { reason, .. }) => reason,
            };

            if attempt == max_attempts {
                warn!(
                    reading_id = %reading.id,
                    attempts = attempt,
                    error = %reason,
                    "delivery retries exhausted"
                );
                return report(
                    DeliveryOutcome::DeadLetter(DeadLetterReason::RetriesExhausted {
                        attempts: attempt,
                        last_error: reason,
                    }),
                    attempts,
                );
            }

            if shutdown.is_cancelled() {
                return report(shutdown_reason(&format!("not retried: {reason}")), attempts);
            }

            let delay = self.retry.backoff.delay(attempt - 1);
            warn!(
                reading_id = %reading.id,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %reason,
                "delivery failed, retrying"
            );

            let resumed = tokio::select! {
                biased;
                _ = shutdown.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            };
            if !resumed {
                return report(shutdown_reason(&format!("not retried: {reason}")), attempts);
            }
        }

        // the loop always returns on its last iteration
        report(shutdown_reason("attempt budget empty"), attempts)
    }
}

fn report(outcome: DeliveryOutcome, attempts: Vec<DeliveryAttempt>) -> DeliveryReport {
    DeliveryReport { outcome, attempts }
}

fn shutdown_reason(detail: &str) -> DeliveryOutcome {
    DeliveryOutcome::DeadLetter(DeadLetterReason::Shutdown {
        detail: detail.to_string(),
    })
}

fn classify_transport_error(err: reqwest::Error) -> DeliveryError {
    let reason = if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        format!("request failed: {err}")
    };
    DeliveryError::Transient {
        status: None,
        reason,
    }
}

pub(crate) fn classify_status(status: StatusCode, body: &str) -> DeliveryError {
    let mut reason = format!("HTTP {status}");
    let excerpt = body.trim();
    if !excerpt.is_empty() {
        let excerpt: String = excerpt.chars().take(REASON_BODY_LIMIT).collect();
        reason.push_str(": ");
        reason.push_str(&excerpt);
    }

    if status.is_server_error() {
        DeliveryError::Transient {
            status: Some(status.as_u16()),
            reason,
        }
    } else {
        DeliveryError::Permanent {
            status: status.as_u16(),
            reason,
        }
    }
}
