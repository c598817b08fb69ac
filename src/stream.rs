// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Event stream subscription.
//!
//! Holds one long-lived `GET <stream_uri>/eventstream/<topic>` open, splits
//! the body into lines, and pushes every `data:` payload onto a channel for
//! the applier.
//!
//! # Frame Protocol
//!
//! ```text
//! event: WorkLogCreated      → logged
//! data: {"eventType":...}    → pushed to the applier
//! id: 1736071200000-0        → becomes Last-Event-ID for the next connect
//! : keep-alive               → ignored
//!                            → (blank) drop connection, resume from last id
//! ```
//!
//! # Reader States
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            ▼                                          │
//!      Connecting ──ok──▶ Streaming ──blank/EOF/idle──▶ Reconnecting
//!        │    ▲
//!        │    └── backoff ──┐
//!        └──err──────────▶ Failed
//!
//!         shutdown (any state) ──▶ Stopped
//! ```
//!
//! `Failed` lasts for the whole backoff after a failed connect, so a reader
//! that cannot subscribe is observable as such.
//!
//! # Resume
//!
//! The position is only ever advanced by an `id:` line. A reconnect sends the
//! last one seen, so payloads the server already delivered are not pushed
//! again. Bytes of an unterminated line are thrown away on reconnect; the
//! server resends that frame.

use crate::config::{ReplicationConfig, StreamConfig};
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::resilience::RetryConfig;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// Header carrying the resume position.
pub const LAST_EVENT_ID: &str = "Last-Event-ID";

// =============================================================================
// Frame parsing
// =============================================================================

/// One parsed line of the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// `event: <name>`
    Event(&'a str),
    /// `data: <payload>`
    Data(&'a str),
    /// `id: <position>`
    Id(&'a str),
    /// Empty line.
    Blank,
    /// `:` comment, typically a keep-alive.
    Comment,
    /// Anything else, verbatim.
    Unknown(&'a str),
}

impl Frame<'_> {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Frame::Event(_) => "event",
            Frame::Data(_) => "data",
            Frame::Id(_) => "id",
            Frame::Blank => "blank",
            Frame::Comment => "comment",
            Frame::Unknown(_) => "unknown",
        }
    }
}

/// Classify a single line (terminator optional).
///
/// A field is recognised with or without one space after the colon; a line
/// naming a field with no colon at all has an empty value.
pub fn parse_line(line: &str) -> Frame<'_> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);

    if line.is_empty() {
        return Frame::Blank;
    }
    if line.starts_with(':') {
        return Frame::Comment;
    }

    let (field, value) = match line.split_once(':') {
        Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
        None => (line, ""),
    };

    match field {
        "data" => Frame::Data(value),
        "id" => Frame::Id(value),
        "event" => Frame::Event(value),
        _ => Frame::Unknown(line),
    }
}

/// Accumulates body chunks and yields complete lines.
///
/// Lines are split on raw `\n` bytes before UTF-8 decoding, so a multi-byte
/// character split across two chunks survives intact.
///
/// Bytes already searched for a terminator are not searched again.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    /// Prefix of `buf` known to contain no `\n`.
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line without its `\n`; `None` until one is available.
    pub fn next_line(&mut self) -> Option<String> {
        let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = self.buf.len();
            return None;
        };
        let pos = self.scanned + offset;
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        self.scanned = 0;
        Some(String::from_utf8_lossy(&line[..pos]).into_owned())
    }

    /// Bytes of an unterminated trailing line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.scanned = 0;
    }
}

// =============================================================================
// Reader state
// =============================================================================

/// Observable state of the stream reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Subscribe request in flight.
    Connecting,
    /// Connected and reading frames.
    Streaming,
    /// A session ended; waiting (if at all) before the next connect.
    Reconnecting,
    /// The last connect failed; backing off before the next one.
    Failed,
    /// Shut down. Terminal.
    Stopped,
}

impl ReaderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReaderState::Stopped)
    }
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderState::Connecting => write!(f, "Connecting"),
            ReaderState::Streaming => write!(f, "Streaming"),
            ReaderState::Reconnecting => write!(f, "Reconnecting"),
            ReaderState::Failed => write!(f, "Failed"),
            ReaderState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Resolve once shutdown is requested or the signal's sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// How one connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    ReceiverGone,
    Reconnect(&'static str),
}

// =============================================================================
// Stream reader
// =============================================================================

/// Persistent subscription to one topic.
pub struct StreamReader {
    client: reqwest::Client,
    url: String,
    topic: String,
    last_event_id: String,
    reconnect: RetryConfig,
    idle_timeout: Duration,
    reconnect_on_blank_line: bool,
    max_line_bytes: usize,
    state_tx: watch::Sender<ReaderState>,
}

impl StreamReader {
    /// Reader for the full subscribe `url` (`.../eventstream/<topic>`).
    pub fn new(url: impl Into<String>, topic: impl Into<String>, config: &StreamConfig) -> Result<Self> {
        let reconnect = config.reconnect_retry();
        let client = reqwest::Client::builder()
            .connect_timeout(reconnect.connection_timeout)
            .build()
            .map_err(|e| ReplicationError::http("build client", e))?;
        let (state_tx, _) = watch::channel(ReaderState::Connecting);

        Ok(Self {
            client,
            url: url.into(),
            topic: topic.into(),
            last_event_id: config.initial_last_event_id.clone(),
            reconnect,
            idle_timeout: config.idle_timeout_duration(),
            reconnect_on_blank_line: config.reconnect_on_blank_line,
            max_line_bytes: config.max_line_bytes.max(1),
            state_tx,
        })
    }

    pub fn from_config(config: &ReplicationConfig) -> Result<Self> {
        Self::new(config.stream_url(), config.topic.clone(), &config.settings.stream)
    }

    /// Watch the reader's state.
    pub fn state_receiver(&self) -> watch::Receiver<ReaderState> {
        self.state_tx.subscribe()
    }

    /// Current resume position.
    pub fn last_event_id(&self) -> &str {
        &self.last_event_id
    }

    fn set_state(&self, state: ReaderState) {
        self.state_tx.send_replace(state);
        metrics::set_reader_state(&self.topic, &state.to_string());
    }

    /// Run until shutdown or until the receiving side of `tx` is dropped.
    ///
    /// Returns the final resume position. `tx` is dropped on return, which
    /// ends the applier's receive loop.
    pub async fn run(mut self, tx: mpsc::Sender<String>, mut shutdown: watch::Receiver<bool>) -> String {
        let span = info_span!("stream_reader", topic = %self.topic);

        async move {
            info!(url = %self.url, last_event_id = %self.last_event_id, "Starting stream reader");
            let mut failures = 0usize;

            loop {
                self.set_state(ReaderState::Connecting);

                let connected = tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut shutdown) => break,
                    result = self.connect() => result,
                };

                match connected {
                    Ok(response) => {
                        metrics::record_stream_connection(&self.topic, true);
                        info!(last_event_id = %self.last_event_id, "Connected to event stream");
                        self.set_state(ReaderState::Streaming);

                        let (end, frames) = self.consume(response, &tx, &mut shutdown).await;
                        match end {
                            SessionEnd::Shutdown => break,
                            SessionEnd::ReceiverGone => {
                                warn!("Event consumer gone, stopping stream reader");
                                break;
                            }
                            SessionEnd::Reconnect(reason) => {
                                metrics::record_stream_reconnect(&self.topic, reason);
                                debug!(reason, frames, last_event_id = %self.last_event_id, "Stream session ended");
                                // A session that carried nothing counts as a failure
                                // so a server closing every connection at once is not hammered.
                                failures = if frames == 0 { failures + 1 } else { 0 };
                                self.set_state(ReaderState::Reconnecting);
                            }
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        self.set_state(ReaderState::Failed);
                        metrics::record_stream_connection(&self.topic, false);
                        metrics::record_stream_reconnect(&self.topic, "connect_failed");
                        warn!(attempt = failures, error = %e, "Failed to connect to event stream");
                    }
                }

                // A failed connect stays visible as Failed through the backoff.
                if failures == 0 {
                    continue;
                }

                let delay = self.reconnect.jittered_delay_for_attempt(failures);
                debug!(attempt = failures, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
                tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut shutdown) => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            self.set_state(ReaderState::Stopped);
            info!(last_event_id = %self.last_event_id, "Stream reader stopped");
            self.last_event_id
        }
        .instrument(span)
        .await
    }

    async fn connect(&self) -> Result<reqwest::Response> {
        let request = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .header(LAST_EVENT_ID, self.last_event_id.as_str())
            .send();

        let response = tokio::time::timeout(self.reconnect.connection_timeout, request)
            .await
            .map_err(|_| ReplicationError::StreamConnection {
                topic: self.topic.clone(),
                message: format!(
                    "no response within {}ms",
                    self.reconnect.connection_timeout.as_millis()
                ),
            })?
            .map_err(|e| ReplicationError::http("subscribe", e))?;

        if !response.status().is_success() {
            return Err(ReplicationError::UnexpectedStatus {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    /// Read one connection to its end. Returns how it ended and how many
    /// frames it carried.
    async fn consume(
        &mut self,
        response: reqwest::Response,
        tx: &mpsc::Sender<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> (SessionEnd, usize) {
        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut frames = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => return (SessionEnd::Shutdown, frames),
                next = tokio::time::timeout(self.idle_timeout, body.next()) => next,
            };

            let chunk = match next {
                Err(_) => {
                    warn!(idle_ms = self.idle_timeout.as_millis() as u64, "Event stream idle, reconnecting");
                    return (SessionEnd::Reconnect("idle_timeout"), frames);
                }
                Ok(None) => {
                    debug!(discarded_bytes = lines.pending(), "Event stream closed by server");
                    return (SessionEnd::Reconnect("closed"), frames);
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "Event stream body error");
                    return (SessionEnd::Reconnect("body_error"), frames);
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            lines.push(&chunk);
            while let Some(line) = lines.next_line() {
                let frame = parse_line(&line);
                metrics::record_stream_frame(&self.topic, frame.label());

                match frame {
                    Frame::Data(payload) => {
                        frames += 1;
                        trace!(bytes = payload.len(), "Data frame");
                        let payload = payload.to_string();
                        tokio::select! {
                            biased;
                            _ = wait_for_shutdown(shutdown) => return (SessionEnd::Shutdown, frames),
                            sent = tx.send(payload) => {
                                if sent.is_err() {
                                    return (SessionEnd::ReceiverGone, frames);
                                }
                            }
                        }
                    }
                    Frame::Id(id) => {
                        frames += 1;
                        trace!(last_event_id = %id, "Id frame");
                        self.last_event_id = id.to_string();
                    }
                    Frame::Event(name) => {
                        frames += 1;
                        debug!(event = %name, "Event frame");
                    }
                    Frame::Comment => trace!("Keep-alive"),
                    Frame::Blank => {
                        if self.reconnect_on_blank_line {
                            debug!("Blank line, resuming from last event id");
                            return (SessionEnd::Reconnect("blank_line"), frames);
                        }
                    }
                    Frame::Unknown(raw) => debug!(line = %raw, "Unknown frame ignored"),
                }
            }

            if lines.pending() > self.max_line_bytes {
                warn!(
                    pending_bytes = lines.pending(),
                    max_line_bytes = self.max_line_bytes,
                    "Unterminated line over limit, reconnecting"
                );
                return (SessionEnd::Reconnect("line_too_long"), frames);
            }
        }
    }
}
