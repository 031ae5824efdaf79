use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::queue::BackpressurePolicy;

const REDACTED: &str = "***";

/// Top-level configuration for the bridge.
///
/// Every section falls back to its defaults when absent, except
/// `queue.backpressure`, which must be chosen explicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub reconnect: ReconnectSettings,
    pub sink: SinkSettings,
    pub queue: QueueSettings,
    pub retry: RetrySettings,
    pub forwarder: ForwarderSettings,
    pub dead_letter: DeadLetterSettings,
    pub shutdown: ShutdownSettings,
    pub logging: LoggingSettings,
}

/// Broker connection and subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    /// Subscription QoS, 0..=2. With QoS >= 1 messages are acknowledged
    /// only after the bridge has taken responsibility for them.
    pub qos: u8,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    /// Connect attempts before startup fails. Later reconnects are unbounded.
    pub startup_connect_attempts: u32,
    pub username: Option<String>,
    pub password: Option<String>,
    /// CA certificate (PEM). Enables TLS when set.
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub request_channel_capacity: usize,
    /// Received packets held while the bridge is not reading. The network
    /// task keeps the session alive until this fills.
    pub inbound_buffer: usize,
}

/// Backoff between broker reconnect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

/// HTTP ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    pub url: String,
    pub timeout_secs: u64,
    pub api_key: Option<String>,
    pub api_key_header: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub capacity: usize,
    pub backpressure: Option<BackpressurePolicy>,
}

/// Delivery retry policy for transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per reading, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderSettings {
    /// Concurrent delivery workers. With more than one, completion order
    /// no longer follows queue order.
    pub concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterKind {
    Log,
    File,
    Sled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterSettings {
    pub kind: DeadLetterKind,
    /// File path for `file`, database directory for `sled`.
    pub path: Option<PathBuf>,
    /// Retention cap for `sled`; oldest entries are removed first.
    pub max_entries: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    pub grace_period_secs: u64,
    /// Keep delivering queued readings during the grace period instead of
    /// dead-lettering them immediately.
    pub drain_on_shutdown: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "meter-bridge".to_string(),
            topic: "water-meter/data".to_string(),
            qos: 1,
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
            startup_connect_attempts: 5,
            username: None,
            password: None,
            ca_cert: None,
            client_cert: None,
            client_key: None,
            request_channel_capacity: 64,
            inbound_buffer: 256,
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000/data".to_string(),
            timeout_secs: 10,
            api_key: None,
            api_key_header: "x-api-key".to_string(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            backpressure: None,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

impl Default for DeadLetterSettings {
    fn default() -> Self {
        Self {
            kind: DeadLetterKind::Log,
            path: None,
            max_entries: None,
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            grace_period_secs: 10,
            drain_on_shutdown: false,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Settings {
    /// Checks values the type system cannot, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if self.broker.topic.trim().is_empty() {
            problems.push("broker.topic must not be empty".to_string());
        }
        if self.broker.qos > 2 {
            problems.push(format!("broker.qos must be 0, 1 or 2 (got {})", self.broker.qos));
        }
        if self.broker.client_cert.is_some() != self.broker.client_key.is_some() {
            problems.push("broker.client_cert and broker.client_key must be set together".to_string());
        }
        if self.broker.client_cert.is_some() && self.broker.ca_cert.is_none() {
            problems.push("broker.client_cert requires broker.ca_cert".to_string());
        }
        if self.broker.password.is_some() && self.broker.username.is_none() {
            problems.push("broker.password requires broker.username".to_string());
        }
        if self.broker.inbound_buffer == 0 {
            problems.push("broker.inbound_buffer must be at least 1".to_string());
        }
        if let Err(err) = reqwest::Url::parse(&self.sink.url) {
            problems.push(format!("sink.url '{}' is invalid: {err}", self.sink.url));
        }
        if self.queue.capacity == 0 {
            problems.push("queue.capacity must be at least 1".to_string());
        }
        if self.queue.backpressure.is_none() {
            problems.push(
                "queue.backpressure must be set explicitly ('reject' or 'evict_oldest')".to_string(),
            );
        }
        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.multiplier < 1.0 || self.reconnect.multiplier < 1.0 {
            problems.push("backoff multipliers must be >= 1.0".to_string());
        }
        if self.forwarder.concurrency == 0 {
            problems.push("forwarder.concurrency must be at least 1".to_string());
        }
        if self.dead_letter.kind != DeadLetterKind::Log && self.dead_letter.path.is_none() {
            problems.push("dead_letter.path is required for file and sled sinks".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    /// A copy safe to print: credentials replaced.
    pub fn redacted(&self) -> Settings {
        let mut copy = self.clone();
        if copy.broker.password.is_some() {
            copy.broker.password = Some(REDACTED.to_string());
        }
        if copy.sink.api_key.is_some() {
            copy.sink.api_key = Some(REDACTED.to_string());
        }
        copy
    }
}
