//! Configuration for the replication service.
//!
//! Configuration is passed to [`ReplicationService::start()`](crate::ReplicationService::start)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use event_replication::config::ReplicationConfig;
//!
//! let config = ReplicationConfig {
//!     broadcast_uri: "http://ingress:8080".into(),
//!     stream_uri: "http://eventstream:8081".into(),
//!     topic: "worklog".into(),
//!     event_type_prefix: "WorkLog".into(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicationConfig
//! ├── broadcast_uri: String         # Ingress adapter base URI
//! ├── stream_uri: String            # Event stream base URI
//! ├── topic: String                 # Broker topic (path segment)
//! ├── event_type_prefix: String     # "WorkLog" → "WorkLogCreated"
//! ├── retry_budget: usize           # Delivery attempts per event
//! ├── local_write: LocalWrite       # broadcast_only | write_through
//! └── settings: ReplicationSettings
//!     ├── transport: TransportConfig  # Outbound backoff + timeout
//!     ├── stream: StreamConfig        # Subscription + reconnect
//!     ├── dedup: DedupConfig          # Seen-set bounds
//!     └── apply: ApplyConfig          # Apply rate limiting
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! broadcast_uri: "http://ingress:8080"
//! stream_uri: "http://eventstream:8081"
//! topic: "worklog"
//! event_type_prefix: "WorkLog"
//! retry_budget: 10
//! local_write: write_through
//!
//! settings:
//!   transport:
//!     initial_delay: "100ms"
//!     request_timeout: "5s"
//!   stream:
//!     idle_timeout: "2m"
//!     initial_last_event_id: "1736071200000-0"
//!   dedup:
//!     capacity: 65536
//! ```

use crate::error::{ReplicationError, Result};
use crate::resilience::{RateLimitConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed to ReplicationService::start()
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `ReplicationService::start()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Base URI of the ingress adapter. Events are POSTed to
    /// `<broadcast_uri>/event/<topic>`.
    pub broadcast_uri: String,

    /// Base URI of the event stream. We subscribe to
    /// `<stream_uri>/eventstream/<topic>`.
    pub stream_uri: String,

    /// Broker topic shared by every replica of this entity.
    pub topic: String,

    /// Prepended to the kind to form the wire event type.
    pub event_type_prefix: String,

    /// Total delivery attempts per outbound event (first try included).
    #[serde(default = "default_retry_budget")]
    pub retry_budget: usize,

    /// Whether local mutations also write the local repository.
    #[serde(default)]
    pub local_write: LocalWrite,

    /// Tunables for the transport, stream, dedup and apply stages.
    #[serde(default)]
    pub settings: ReplicationSettings,
}

fn default_retry_budget() -> usize {
    10
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            broadcast_uri: "http://localhost:8080".to_string(),
            stream_uri: "http://localhost:8081".to_string(),
            topic: "topic".to_string(),
            event_type_prefix: "Entity".to_string(),
            retry_budget: default_retry_budget(),
            local_write: LocalWrite::default(),
            settings: ReplicationSettings::default(),
        }
    }
}

impl ReplicationConfig {
    /// Config pointing both endpoints at `base_uri` with fast test timings.
    pub fn for_testing(base_uri: &str, topic: &str, prefix: &str) -> Self {
        Self {
            broadcast_uri: base_uri.to_string(),
            stream_uri: base_uri.to_string(),
            topic: topic.to_string(),
            event_type_prefix: prefix.to_string(),
            retry_budget: 3,
            local_write: LocalWrite::BroadcastOnly,
            settings: ReplicationSettings::for_testing(),
        }
    }

    /// Full URL events are POSTed to.
    pub fn broadcast_url(&self) -> String {
        format!("{}/event/{}", self.broadcast_uri.trim_end_matches('/'), self.topic)
    }

    /// Full URL the stream reader subscribes to.
    pub fn stream_url(&self) -> String {
        format!("{}/eventstream/{}", self.stream_uri.trim_end_matches('/'), self.topic)
    }

    /// Retry schedule for outbound delivery.
    pub fn delivery_retry(&self) -> RetryConfig {
        self.settings.transport.retry_config(self.retry_budget)
    }

    /// Check the config before any task is spawned.
    pub fn validate(&self) -> Result<()> {
        check_uri("broadcast_uri", &self.broadcast_uri)?;
        check_uri("stream_uri", &self.stream_uri)?;

        if self.topic.trim().is_empty() {
            return Err(ReplicationError::Config("topic must not be empty".into()));
        }
        if self.topic.contains('/') {
            return Err(ReplicationError::Config(format!(
                "topic must be a single path segment, got {:?}",
                self.topic
            )));
        }
        if self.event_type_prefix.trim().is_empty() {
            return Err(ReplicationError::Config(
                "event_type_prefix must not be empty".into(),
            ));
        }
        if self.retry_budget == 0 {
            return Err(ReplicationError::Config(
                "retry_budget must be at least 1".into(),
            ));
        }
        let factor = self.settings.transport.backoff_factor;
        if !factor.is_finite() || factor < 1.0 {
            return Err(ReplicationError::Config(format!(
                "transport.backoff_factor must be a finite number >= 1.0, got {}",
                factor
            )));
        }
        if self.settings.stream.max_line_bytes == 0 {
            return Err(ReplicationError::Config(
                "stream.max_line_bytes must be at least 1".into(),
            ));
        }
        if self.settings.stream.channel_capacity == 0 {
            return Err(ReplicationError::Config(
                "stream.channel_capacity must be at least 1".into(),
            ));
        }

        let durations = [
            ("transport.initial_delay", &self.settings.transport.initial_delay),
            ("transport.max_delay", &self.settings.transport.max_delay),
            ("transport.request_timeout", &self.settings.transport.request_timeout),
            ("stream.connect_timeout", &self.settings.stream.connect_timeout),
            ("stream.idle_timeout", &self.settings.stream.idle_timeout),
            ("stream.reconnect_initial_delay", &self.settings.stream.reconnect_initial_delay),
            ("stream.reconnect_max_delay", &self.settings.stream.reconnect_max_delay),
        ];
        for (name, value) in durations {
            humantime::parse_duration(value).map_err(|e| {
                ReplicationError::Config(format!("{} is not a duration ({:?}): {}", name, value, e))
            })?;
        }

        Ok(())
    }
}

fn check_uri(name: &str, uri: &str) -> Result<()> {
    if uri.trim().is_empty() {
        return Err(ReplicationError::Config(format!("{} must not be empty", name)));
    }
    if !(uri.starts_with("http://") || uri.starts_with("https://")) {
        return Err(ReplicationError::Config(format!(
            "{} must be an http(s) URI, got {:?}",
            name, uri
        )));
    }
    Ok(())
}

/// What a local mutation does to the local repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalWrite {
    /// Only broadcast. Local state changes when this replica consumes the
    /// event from its own subscription.
    #[default]
    BroadcastOnly,

    /// Broadcast, then apply locally and mark the event as seen so the
    /// echo from the stream is skipped.
    WriteThrough,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicationSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Tunables grouped by pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReplicationSettings {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub apply: ApplyConfig,
}

impl ReplicationSettings {
    /// Millisecond-scale timings for tests.
    pub fn for_testing() -> Self {
        Self {
            transport: TransportConfig {
                initial_delay: "5ms".to_string(),
                max_delay: "50ms".to_string(),
                backoff_factor: 2.0,
                request_timeout: "2s".to_string(),
            },
            stream: StreamConfig {
                channel_capacity: 64,
                connect_timeout: "2s".to_string(),
                idle_timeout: "10s".to_string(),
                reconnect_initial_delay: "10ms".to_string(),
                reconnect_max_delay: "100ms".to_string(),
                reconnect_on_blank_line: true,
                initial_last_event_id: String::new(),
                max_line_bytes: 64 * 1024,
            },
            dedup: DedupConfig::default(),
            apply: ApplyConfig::default(),
        }
    }
}

fn parse_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(fallback)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TransportConfig: outbound delivery
// ═══════════════════════════════════════════════════════════════════════════════

/// Backoff and timeout for outbound delivery.
///
/// The attempt budget lives on [`ReplicationConfig::retry_budget`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Delay before the second attempt (e.g., "100ms").
    #[serde(default = "default_initial_delay")]
    pub initial_delay: String,

    /// Backoff ceiling (e.g., "30s").
    #[serde(default = "default_max_delay")]
    pub max_delay: String,

    /// Backoff multiplier.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Per-attempt request timeout (e.g., "5s").
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
}

fn default_initial_delay() -> String {
    "100ms".to_string()
}

fn default_max_delay() -> String {
    "30s".to_string()
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_request_timeout() -> String {
    "5s".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_factor: default_backoff_factor(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl TransportConfig {
    /// Build the delivery retry schedule for `max_attempts` attempts.
    pub fn retry_config(&self, max_attempts: usize) -> RetryConfig {
        let defaults = RetryConfig::default();
        RetryConfig {
            max_attempts,
            initial_delay: parse_or(&self.initial_delay, defaults.initial_delay),
            max_delay: parse_or(&self.max_delay, defaults.max_delay),
            backoff_factor: self.backoff_factor,
            connection_timeout: parse_or(&self.request_timeout, defaults.connection_timeout),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StreamConfig: inbound subscription
// ═══════════════════════════════════════════════════════════════════════════════

/// Stream reader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Capacity of the reader → applier channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Timeout for the subscribe request to return headers.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    /// Reconnect if no bytes arrive for this long.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: String,

    /// First reconnect delay.
    #[serde(default = "default_reconnect_initial_delay")]
    pub reconnect_initial_delay: String,

    /// Reconnect delay ceiling.
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay: String,

    /// Treat a blank line as "drop the connection and resume".
    ///
    /// When false, blank lines are ordinary frame separators.
    #[serde(default = "default_true")]
    pub reconnect_on_blank_line: bool,

    /// `Last-Event-ID` sent on the very first connect.
    #[serde(default)]
    pub initial_last_event_id: String,

    /// Longest unterminated line buffered before the connection is dropped.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

fn default_max_line_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_connect_timeout() -> String {
    "10s".to_string()
}

fn default_idle_timeout() -> String {
    "5m".to_string()
}

fn default_reconnect_initial_delay() -> String {
    "500ms".to_string()
}

fn default_reconnect_max_delay() -> String {
    "60s".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            connect_timeout: default_connect_timeout(),
            idle_timeout: default_idle_timeout(),
            reconnect_initial_delay: default_reconnect_initial_delay(),
            reconnect_max_delay: default_reconnect_max_delay(),
            reconnect_on_blank_line: true,
            initial_last_event_id: String::new(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl StreamConfig {
    /// Parse the idle timeout, falling back to 5 minutes.
    pub fn idle_timeout_duration(&self) -> Duration {
        parse_or(&self.idle_timeout, Duration::from_secs(300))
    }

    /// Infinite reconnect schedule.
    pub fn reconnect_retry(&self) -> RetryConfig {
        let daemon = RetryConfig::daemon();
        RetryConfig {
            initial_delay: parse_or(&self.reconnect_initial_delay, daemon.initial_delay),
            max_delay: parse_or(&self.reconnect_max_delay, daemon.max_delay),
            connection_timeout: parse_or(&self.connect_timeout, daemon.connection_timeout),
            ..daemon
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DedupConfig / ApplyConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Seen-event set configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Hashes remembered before the least recently seen is evicted.
    /// 0 = unbounded.
    #[serde(default = "default_dedup_capacity")]
    pub capacity: usize,

    /// Recompute each inbound event's hash and discard mismatches.
    #[serde(default)]
    pub verify_content_hash: bool,
}

fn default_dedup_capacity() -> usize {
    65_536
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            capacity: default_dedup_capacity(),
            verify_content_hash: false,
        }
    }
}

/// Apply stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyConfig {
    /// Rate-limit repository applies.
    /// Smooths the backlog replay after many replicas reconnect at once.
    #[serde(default)]
    pub rate_limit_enabled: bool,

    /// Sustained applies per second.
    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,

    /// Burst above the sustained rate.
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
}

fn default_rate_limit_per_sec() -> u32 {
    10_000
}

fn default_rate_limit_burst() -> u32 {
    1000
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            rate_limit_enabled: false,
            rate_limit_per_sec: default_rate_limit_per_sec(),
            rate_limit_burst: default_rate_limit_burst(),
        }
    }
}

impl ApplyConfig {
    /// Rate limit settings, or `None` when disabled.
    pub fn rate_limit_config(&self) -> Option<RateLimitConfig> {
        if self.rate_limit_enabled {
            Some(RateLimitConfig {
                burst_size: self.rate_limit_burst,
                refill_rate: self.rate_limit_per_sec,
            })
        } else {
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ReplicationConfig {
        ReplicationConfig::for_testing("http://127.0.0.1:9000", "worklog", "WorkLog")
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ReplicationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_budget, 10);
        assert_eq!(config.topic, "topic");
        assert_eq!(config.local_write, LocalWrite::BroadcastOnly);
    }

    #[test]
    fn test_urls() {
        let mut config = valid();
        assert_eq!(config.broadcast_url(), "http://127.0.0.1:9000/event/worklog");
        assert_eq!(config.stream_url(), "http://127.0.0.1:9000/eventstream/worklog");

        config.broadcast_uri = "http://ingress:8080/".to_string();
        assert_eq!(config.broadcast_url(), "http://ingress:8080/event/worklog");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases: Vec<(&str, Box<dyn Fn(&mut ReplicationConfig)>)> = vec![
            ("empty broadcast", Box::new(|c| c.broadcast_uri.clear())),
            ("ftp stream", Box::new(|c| c.stream_uri = "ftp://host".into())),
            ("empty topic", Box::new(|c| c.topic = "  ".into())),
            ("slash topic", Box::new(|c| c.topic = "a/b".into())),
            ("empty prefix", Box::new(|c| c.event_type_prefix.clear())),
            ("zero budget", Box::new(|c| c.retry_budget = 0)),
            ("zero channel", Box::new(|c| c.settings.stream.channel_capacity = 0)),
            ("zero line limit", Box::new(|c| c.settings.stream.max_line_bytes = 0)),
            ("bad duration", Box::new(|c| c.settings.stream.idle_timeout = "soon".into())),
        ];

        for (name, mutate) in cases {
            let mut config = valid();
            mutate(&mut config);
            let err = config.validate().unwrap_err();
            assert!(matches!(err, ReplicationError::Config(_)), "case {}", name);
        }
    }

    #[test]
    fn test_validate_rejects_shrinking_backoff() {
        for factor in [-2.0, 0.0, 0.5, f64::NAN, f64::INFINITY] {
            let mut config = valid();
            config.settings.transport.backoff_factor = factor;
            let err = config.validate().unwrap_err();
            assert!(matches!(err, ReplicationError::Config(_)), "factor {}", factor);
        }

        let mut config = valid();
        config.settings.transport.backoff_factor = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_delivery_retry_uses_budget() {
        let mut config = ReplicationConfig::default();
        config.retry_budget = 4;
        let retry = config.delivery_retry();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.initial_delay, Duration::from_millis(100));
        assert_eq!(retry.max_delay, Duration::from_secs(30));
        assert_eq!(retry.connection_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_reconnect_retry_is_infinite() {
        let stream = StreamConfig {
            reconnect_initial_delay: "250ms".to_string(),
            reconnect_max_delay: "10s".to_string(),
            ..Default::default()
        };
        let retry = stream.reconnect_retry();
        assert_eq!(retry.max_attempts, usize::MAX);
        assert_eq!(retry.initial_delay, Duration::from_millis(250));
        assert_eq!(retry.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_idle_timeout_formats_and_fallback() {
        let test_cases = [
            ("5s", Duration::from_secs(5)),
            ("2m", Duration::from_secs(120)),
            ("500ms", Duration::from_millis(500)),
            ("invalid", Duration::from_secs(300)),
        ];

        for (input, expected) in test_cases {
            let config = StreamConfig {
                idle_timeout: input.to_string(),
                ..Default::default()
            };
            assert_eq!(config.idle_timeout_duration(), expected, "Failed for input: {}", input);
        }
    }

    #[test]
    fn test_apply_rate_limit_config() {
        let mut config = ApplyConfig::default();
        assert!(config.rate_limit_config().is_none());

        config.rate_limit_enabled = true;
        config.rate_limit_per_sec = 500;
        config.rate_limit_burst = 50;

        let rate = config.rate_limit_config().unwrap();
        assert_eq!(rate.refill_rate, 500);
        assert_eq!(rate.burst_size, 50);
    }

    #[test]
    fn test_dedup_defaults() {
        let config = DedupConfig::default();
        assert_eq!(config.capacity, 65_536);
        assert!(!config.verify_content_hash);
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let json = r#"{
            "broadcast_uri": "http://ingress:8080",
            "stream_uri": "http://stream:8081",
            "topic": "worklog",
            "event_type_prefix": "WorkLog",
            "local_write": "write_through"
        }"#;
        let config: ReplicationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.retry_budget, 10);
        assert_eq!(config.local_write, LocalWrite::WriteThrough);
        assert_eq!(config.settings.stream.channel_capacity, 1024);
        assert!(config.settings.stream.reconnect_on_blank_line);
        assert!(config.settings.stream.initial_last_event_id.is_empty());
        assert_eq!(config.settings.stream.max_line_bytes, 4 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_json_roundtrip() {
        let mut config = valid();
        config.settings.stream.initial_last_event_id = "17".to_string();
        config.local_write = LocalWrite::WriteThrough;

        let json = serde_json::to_string(&config).unwrap();
        let parsed: ReplicationConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.topic, "worklog");
        assert_eq!(parsed.settings.stream.initial_last_event_id, "17");
        assert_eq!(parsed.local_write, LocalWrite::WriteThrough);
        assert_eq!(parsed.settings.transport.initial_delay, "5ms");
    }
}
