//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - An in-process fake broker (ingress POST + event stream) on axum
//! - A recording repository for asserting which calls were made
//! - Event and frame helpers

#![allow(dead_code)]

pub mod broker;
pub mod recording;

pub use broker::*;
pub use recording::*;

use event_replication::{Entity, Event, EventKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const TOPIC: &str = "worklog";
pub const PREFIX: &str = "WorkLog";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkLog {
    pub id: String,
    pub status: String,
}

impl Entity for WorkLog {
    type Id = String;
    fn id(&self) -> String {
        self.id.clone()
    }
}

pub fn log(id: &str, status: &str) -> WorkLog {
    WorkLog {
        id: id.to_string(),
        status: status.to_string(),
    }
}

/// Sealed, encoded event for `entity`.
pub fn event_json(kind: EventKind, entity: &WorkLog) -> String {
    Event::for_entity(kind, PREFIX, entity)
        .unwrap()
        .seal()
        .unwrap()
        .encode_to_string()
        .unwrap()
}

/// `id:` and `data:` lines for one event, without the trailing blank line.
pub fn frame(id: usize, json: &str) -> String {
    format!("id: {}\ndata: {}\n", id, json)
}

/// Poll `condition` every 10ms until it holds, panicking after 5s.
pub async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Install a test subscriber once (honours `RUST_LOG`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
