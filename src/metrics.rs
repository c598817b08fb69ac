//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Outbound delivery attempts, outcomes and latency
//! - Stream subscription status and frame counts
//! - Apply outcomes (applied, duplicate, discarded, ...)
//! - Seen-set occupancy
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `replication_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration)
//!
//! Installing an exporter is the host's job; without one every call is a no-op.
//!
//! # Usage
//!
//! ```rust,no_run
//! use event_replication::metrics;
//! use std::time::Duration;
//!
//! metrics::record_delivery("worklog", "success", 2, Duration::from_millis(40));
//! metrics::record_apply_outcome("worklog", "duplicate");
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Outbound Delivery
// =============================================================================

/// Record one POST attempt and how it ended
/// (`created`, `retryable_status`, `rejected`, `transport_error`).
pub fn record_delivery_attempt(topic: &str, outcome: &str) {
    counter!(
        "replication_delivery_attempts_total",
        "topic" => topic.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a finished delivery (all attempts).
pub fn record_delivery(topic: &str, status: &str, attempts: usize, duration: Duration) {
    counter!(
        "replication_deliveries_total",
        "topic" => topic.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("replication_delivery_attempts", "topic" => topic.to_string()).record(attempts as f64);
    histogram!("replication_delivery_duration_seconds", "topic" => topic.to_string())
        .record(duration.as_secs_f64());
}

/// Record a local mutation issued through the service.
pub fn record_local_mutation(topic: &str, kind: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "replication_local_mutations_total",
        "topic" => topic.to_string(),
        "kind" => kind.to_string(),
        "status" => status
    )
    .increment(1);
}

// =============================================================================
// Stream Subscription
// =============================================================================

/// Record a subscribe attempt.
pub fn record_stream_connection(topic: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "replication_stream_connections_total",
        "topic" => topic.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a reconnect and what triggered it
/// (`blank_line`, `closed`, `idle_timeout`, `body_error`, `connect_failed`).
pub fn record_stream_reconnect(topic: &str, reason: &str) {
    counter!(
        "replication_stream_reconnects_total",
        "topic" => topic.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a parsed frame by type (`data`, `id`, `event`, `comment`, `blank`, `unknown`).
pub fn record_stream_frame(topic: &str, frame: &str) {
    counter!(
        "replication_stream_frames_total",
        "topic" => topic.to_string(),
        "frame" => frame.to_string()
    )
    .increment(1);
}

/// Gauge for reader state.
pub fn set_reader_state(topic: &str, state: &str) {
    let value = match state {
        "Connecting" => 0.0,
        "Streaming" => 1.0,
        "Reconnecting" => 2.0,
        "Failed" => 3.0,
        "Stopped" => 4.0,
        _ => -1.0,
    };
    gauge!("replication_reader_state", "topic" => topic.to_string()).set(value);
}

// =============================================================================
// Apply
// =============================================================================

/// Record an apply outcome
/// (`applied`, `duplicate`, `discarded`, `unknown_kind`, `failed`, `keep_alive`).
pub fn record_apply_outcome(topic: &str, outcome: &str) {
    counter!(
        "replication_apply_total",
        "topic" => topic.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record time spent in the repository for one applied event.
pub fn record_apply_latency(topic: &str, kind: &str, duration: Duration) {
    histogram!(
        "replication_apply_duration_seconds",
        "topic" => topic.to_string(),
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Gauge for the number of hashes in the seen set.
pub fn set_seen_events(topic: &str, count: usize) {
    gauge!("replication_seen_events", "topic" => topic.to_string()).set(count as f64);
}

/// Gauge for service state.
pub fn set_service_state(state: &str) {
    let value = match state {
        "Created" => 0.0,
        "Running" => 1.0,
        "ShuttingDown" => 2.0,
        "Stopped" => 3.0,
        _ => -1.0,
    };
    gauge!("replication_service_state").set(value);
}
