// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for event replication.
//!
//! Errors are categorized by where they come from (encoding, HTTP delivery,
//! stream subscription, the local repository) and carry enough context to
//! debug a failed delivery or a discarded frame.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Encoding` | No | Malformed event or payload JSON (schema drift) |
//! | `Http` | Yes | Connection refused, timeouts, dropped bodies |
//! | `UnexpectedStatus` | 5xx/429 only | Endpoint answered with the wrong status |
//! | `DeliveryFailed` | No | Retry budget exhausted (already retried) |
//! | `StreamConnection` | Yes | Subscribe failed (handled by reconnect loop) |
//! | `Repository` | No | Local apply failed |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Service lifecycle misuse |
//! | `Shutdown` | No | Service is shutting down |
//!
//! # Retry Behavior
//!
//! The HTTP transport uses [`ReplicationError::is_retryable()`] to decide
//! whether another attempt is worth making. Inbound errors never reach the
//! callers of [`ReplicationService`](crate::ReplicationService); they are
//! logged by the reader and applier tasks.

use crate::repository::RepositoryError;
use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur while replicating events.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Event or entity (de)serialization failure.
    ///
    /// One malformed message never takes down a subscriber: the applier
    /// logs and discards it.
    #[error("Encoding error ({context}): {source}")]
    Encoding {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// HTTP client error (connect, timeout, body read).
    #[error("HTTP error ({operation}): {source}")]
    Http {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered, but not with the status we need.
    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    /// The transport gave up after its retry budget.
    #[error("Delivery to {url} failed after {attempts} attempts: {last_error}")]
    DeliveryFailed {
        url: String,
        attempts: usize,
        last_error: String,
    },

    /// Subscribing to the event stream failed.
    ///
    /// Only used inside the reader's reconnect loop.
    #[error("Stream connection error ({topic}): {message}")]
    StreamConnection { topic: String, message: String },

    /// The local repository rejected an operation.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lifecycle violation (e.g. shutting down twice).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,
}

impl ReplicationError {
    /// Wrap a serde_json error with what we were doing when it happened.
    pub fn encoding(context: &'static str, source: serde_json::Error) -> Self {
        Self::Encoding { context, source }
    }

    /// Wrap a reqwest error with the operation that produced it.
    pub fn http(operation: &'static str, source: reqwest::Error) -> Self {
        Self::Http { operation, source }
    }

    /// Check if this error is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { .. } => true,
            Self::UnexpectedStatus { status, .. } => *status >= 500 || *status == 429,
            Self::StreamConnection { .. } => true,
            Self::Encoding { .. } => false,
            Self::DeliveryFailed { .. } => false,
            Self::Repository(_) => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
        }
    }
}
