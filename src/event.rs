// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The replication event envelope and its content hash.
//!
//! Every local mutation is turned into an [`Event`]: a kind, a creation
//! time, a schema version, the serialized entity, and a content hash.
//!
//! # Wire Format
//!
//! ```json
//! {
//!   "eventType": "WorkLogCreated",
//!   "eventTime": "2026-01-05T10:15:00.123456789Z",
//!   "eventVersion": 1,
//!   "eventSHA": "9f2c...e1",
//!   "eventData": "{\"id\":\"42\",\"status\":\"open\"}"
//! }
//! ```
//!
//! # Content Hash
//!
//! The hash is the hex SHA-256 of the event's JSON encoding with an empty
//! `eventSHA`. Sealing therefore hashes (type, time, version, data) only and
//! sealing twice yields the same value. Since the time is part of the hash,
//! two identical mutations issued at different instants are two distinct
//! events: deduplication removes redelivery of one event, not repeated
//! mutations.

use crate::error::{ReplicationError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Schema version stamped on every event we produce.
pub const EVENT_VERSION: u32 = 1;

/// Mutation kind carried by an event.
///
/// On the wire the kind is appended to a per-entity prefix
/// (`"WorkLog" + "Created"`), so several entity types can share a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    /// All kinds, in wire order.
    pub const ALL: [EventKind; 3] = [EventKind::Created, EventKind::Updated, EventKind::Deleted];

    /// Wire suffix for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "Created",
            EventKind::Updated => "Updated",
            EventKind::Deleted => "Deleted",
        }
    }

    /// Full wire event type for the given prefix.
    pub fn event_type(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.as_str())
    }

    /// Classify a wire event type relative to a prefix.
    ///
    /// Returns `None` for types of other entities or unknown kinds.
    pub fn classify(event_type: &str, prefix: &str) -> Option<Self> {
        match event_type.strip_prefix(prefix)? {
            "Created" => Some(EventKind::Created),
            "Updated" => Some(EventKind::Updated),
            "Deleted" => Some(EventKind::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A replication event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Prefixed kind, e.g. `"WorkLogCreated"`.
    #[serde(rename = "eventType")]
    pub event_type: String,

    /// Creation time at the producing replica. Informational only.
    #[serde(rename = "eventTime")]
    pub event_time: DateTime<Utc>,

    /// Schema version (currently always [`EVENT_VERSION`]).
    #[serde(rename = "eventVersion")]
    pub event_version: u32,

    /// Hex SHA-256 content hash; empty until [`seal`](Self::seal)ed.
    #[serde(rename = "eventSHA")]
    pub event_sha: String,

    /// Serialized entity.
    #[serde(rename = "eventData")]
    pub event_data: String,
}

/// Borrowed view used to hash an event without cloning its payload.
///
/// Field names and order must match [`Event`] exactly.
#[derive(Serialize)]
struct HashView<'a> {
    #[serde(rename = "eventType")]
    event_type: &'a str,
    #[serde(rename = "eventTime")]
    event_time: &'a DateTime<Utc>,
    #[serde(rename = "eventVersion")]
    event_version: u32,
    #[serde(rename = "eventSHA")]
    event_sha: &'static str,
    #[serde(rename = "eventData")]
    event_data: &'a str,
}

impl Event {
    /// Build an unsealed event stamped with the current time.
    pub fn build(kind: EventKind, prefix: &str, payload: impl Into<String>) -> Self {
        Self::build_at(kind, prefix, payload, Utc::now())
    }

    /// Build an unsealed event with an explicit creation time.
    pub fn build_at(
        kind: EventKind,
        prefix: &str,
        payload: impl Into<String>,
        event_time: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: kind.event_type(prefix),
            event_time,
            event_version: EVENT_VERSION,
            event_sha: String::new(),
            event_data: payload.into(),
        }
    }

    /// Serialize `entity` as the payload of a new unsealed event.
    pub fn for_entity<T: Serialize>(kind: EventKind, prefix: &str, entity: &T) -> Result<Self> {
        let payload = serde_json::to_string(entity)
            .map_err(|e| ReplicationError::encoding("encode entity", e))?;
        Ok(Self::build(kind, prefix, payload))
    }

    /// Compute the content hash of this event, ignoring any hash it carries.
    pub fn compute_content_hash(&self) -> Result<String> {
        let view = HashView {
            event_type: &self.event_type,
            event_time: &self.event_time,
            event_version: self.event_version,
            event_sha: "",
            event_data: &self.event_data,
        };
        let bytes = serde_json::to_vec(&view)
            .map_err(|e| ReplicationError::encoding("hash event", e))?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Return this event with its content hash populated.
    pub fn seal(mut self) -> Result<Self> {
        self.event_sha = self.compute_content_hash()?;
        Ok(self)
    }

    /// Whether a hash has been set (not whether it is correct).
    pub fn is_sealed(&self) -> bool {
        !self.event_sha.is_empty()
    }

    /// Recompute the hash and compare it with the carried one.
    pub fn verify_hash(&self) -> bool {
        match self.compute_content_hash() {
            Ok(computed) => computed == self.event_sha,
            Err(_) => false,
        }
    }

    /// Classify this event's type relative to `prefix`.
    pub fn kind(&self, prefix: &str) -> Option<EventKind> {
        EventKind::classify(&self.event_type, prefix)
    }

    /// Canonical JSON encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ReplicationError::encoding("encode event", e))
    }

    /// Canonical JSON encoding as a string (one `data:` frame worth).
    pub fn encode_to_string(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ReplicationError::encoding("encode event", e))
    }

    /// Decode an event from raw JSON bytes.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|e| ReplicationError::encoding("decode event", e))
    }

    /// Decode an event from a raw frame payload.
    pub fn decode_str(raw: &str) -> Result<Self> {
        Self::decode(raw.as_bytes())
    }

    /// Decode the entity carried in the payload.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.event_data)
            .map_err(|e| ReplicationError::encoding("decode payload", e))
    }
}
