// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Seen-event set: which content hashes this replica has already applied.
//!
//! # Bounding
//!
//! The set is split into two generations. Inserts go to the current
//! generation; when it fills, the previous generation is dropped and the
//! current one becomes previous. A hash found in the previous generation is
//! promoted back to current, so hashes that keep being redelivered survive
//! rotation and the ones evicted are the least recently seen.
//!
//! ```text
//!   insert(h) ──▶ current ──(full)──▶ previous ──(next rotation)──▶ dropped
//!                    ▲                    │
//!                    └──── seen again ────┘
//! ```
//!
//! A capacity of `0` disables eviction entirely.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Seen set shared between the applier and the service (write-through).
pub type SharedSeenEvents = Arc<Mutex<SeenEvents>>;

/// Content hashes already applied (or being applied) by this replica.
#[derive(Debug, Default)]
pub struct SeenEvents {
    /// Per-generation limit; 0 = unbounded.
    generation_limit: usize,
    current: HashSet<String>,
    previous: HashSet<String>,
    evicted: u64,
}

impl SeenEvents {
    /// A set holding at most `capacity` hashes (`0` = unbounded).
    ///
    /// Odd capacities round up; the smallest bounded set holds 2.
    pub fn new(capacity: usize) -> Self {
        let generation_limit = if capacity == 0 { 0 } else { capacity.div_ceil(2) };
        Self {
            generation_limit,
            current: HashSet::new(),
            previous: HashSet::new(),
            evicted: 0,
        }
    }

    /// A set that never forgets.
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Wrap in the shared handle used by the service.
    pub fn shared(capacity: usize) -> SharedSeenEvents {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    /// Record `hash`. Returns `true` if it had not been seen before.
    pub fn insert(&mut self, hash: &str) -> bool {
        if self.current.contains(hash) {
            return false;
        }
        if self.previous.remove(hash) {
            self.push_current(hash.to_string());
            return false;
        }
        self.push_current(hash.to_string());
        true
    }

    /// Drop `hash` so a later delivery of it is applied.
    pub fn forget(&mut self, hash: &str) -> bool {
        self.current.remove(hash) | self.previous.remove(hash)
    }

    /// Whether `hash` is remembered, without refreshing it.
    pub fn contains(&self, hash: &str) -> bool {
        self.current.contains(hash) || self.previous.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.current.len() + self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.previous.is_empty()
    }

    /// Maximum number of hashes held, `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        (self.generation_limit > 0).then_some(self.generation_limit * 2)
    }

    /// Hashes forgotten through rotation so far.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    fn push_current(&mut self, hash: String) {
        if self.generation_limit > 0 && self.current.len() >= self.generation_limit {
            self.evicted += self.previous.len() as u64;
            self.previous = std::mem::take(&mut self.current);
        }
        self.current.insert(hash);
    }
}
