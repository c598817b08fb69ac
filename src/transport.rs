// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Outbound delivery of events to the ingress adapter.
//!
//! [`Transport`] is the seam the service broadcasts through; [`HttpTransport`]
//! is the production implementation.
//!
//! # Delivery Contract
//!
//! ```text
//! send(event)
//!   │ seal + encode once
//!   ▼
//! POST <broadcast_uri>/event/<topic> ──▶ 201 ──▶ Ok(())
//!   │
//!   ├─ connect error / timeout / 5xx / 429 ──▶ sleep(jittered backoff) ──▶ retry
//!   ├─ any other status ──────────────────────▶ Err(UnexpectedStatus)
//!   └─ budget exhausted ──────────────────────▶ Err(DeliveryFailed)
//! ```
//!
//! Delivery is at-least-once: a POST that times out after the ingress
//! accepted it is retried and the event goes out twice. Receivers drop the
//! second copy by content hash.

use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};
use crate::event::Event;
use crate::metrics;
use crate::resilience::RetryConfig;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Type alias for boxed transport futures.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Something that can publish an event to every replica.
pub trait Transport: Send + Sync + 'static {
    /// Deliver one event. Returns once the event is accepted or delivery
    /// has definitively failed.
    fn send(&self, event: Event) -> BoxFuture<'_, ()>;
}

/// HTTP broadcaster with bounded, jittered retries.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    topic: String,
    retry: RetryConfig,
}

impl HttpTransport {
    /// Transport posting to `url` (the full `.../event/<topic>` URL).
    pub fn new(url: impl Into<String>, topic: impl Into<String>, retry: RetryConfig) -> Result<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(ReplicationError::Config("broadcast url must not be empty".into()));
        }
        if retry.max_attempts == 0 {
            return Err(ReplicationError::Config("retry budget must be at least 1".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(retry.connection_timeout)
            .build()
            .map_err(|e| ReplicationError::http("build client", e))?;

        Ok(Self {
            client,
            url,
            topic: topic.into(),
            retry,
        })
    }

    /// Transport for the broadcast endpoint and budget in `config`.
    pub fn from_config(config: &ReplicationConfig) -> Result<Self> {
        Self::new(config.broadcast_url(), config.topic.clone(), config.delivery_retry())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// One POST. `Ok(())` only on 201.
    async fn attempt(&self, body: Bytes) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.retry.connection_timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| ReplicationError::http("broadcast event", e))?;

        let status = response.status();
        if status == StatusCode::CREATED {
            return Ok(());
        }
        Err(ReplicationError::UnexpectedStatus {
            url: self.url.clone(),
            status: status.as_u16(),
        })
    }

    async fn deliver(&self, event: Event) -> Result<()> {
        let event = event.seal()?;
        let body = Bytes::from(event.encode()?);
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match self.attempt(body.clone()).await {
                Ok(()) => {
                    metrics::record_delivery_attempt(&self.topic, "created");
                    metrics::record_delivery(&self.topic, "success", attempt, start.elapsed());
                    if attempt > 1 {
                        debug!(
                            topic = %self.topic,
                            event_sha = %event.event_sha,
                            attempt,
                            "Event delivered after retry"
                        );
                    } else {
                        debug!(topic = %self.topic, event_sha = %event.event_sha, "Event delivered");
                    }
                    return Ok(());
                }
                Err(e) => e,
            };

            let outcome = match &err {
                ReplicationError::Http { .. } => "transport_error",
                _ if err.is_retryable() => "retryable_status",
                _ => "rejected",
            };
            metrics::record_delivery_attempt(&self.topic, outcome);

            if !err.is_retryable() {
                metrics::record_delivery(&self.topic, "rejected", attempt, start.elapsed());
                error!(
                    topic = %self.topic,
                    event_sha = %event.event_sha,
                    attempt,
                    error = %err,
                    "Event rejected by ingress"
                );
                return Err(err);
            }

            if !self.retry.has_attempts_left(attempt) {
                metrics::record_delivery(&self.topic, "exhausted", attempt, start.elapsed());
                error!(
                    topic = %self.topic,
                    event_sha = %event.event_sha,
                    attempt,
                    error = %err,
                    "Event delivery failed after max retries"
                );
                return Err(ReplicationError::DeliveryFailed {
                    url: self.url.clone(),
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            let delay = self.retry.jittered_delay_for_attempt(attempt);
            warn!(
                topic = %self.topic,
                event_sha = %event.event_sha,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Delivery attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl Transport for HttpTransport {
    fn send(&self, event: Event) -> BoxFuture<'_, ()> {
        Box::pin(self.deliver(event))
    }
}
