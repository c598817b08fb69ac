//! Service state and health types.
//!
//! # State Transitions
//!
//! ```text
//!          start()              shutdown()
//! Created ─────────▶ Running ─────────────▶ ShuttingDown ──▶ Stopped
//! ```
//!
//! - **Created**: tasks not spawned yet (only observable during `start()`).
//! - **Running**: reader and applier tasks alive; mutations accepted.
//! - **ShuttingDown**: shutdown signalled, waiting for the tasks to join.
//! - **Stopped**: tasks joined. Mutations fail with `Shutdown`; reads still work.

use crate::applier::ApplyStats;
use crate::stream::ReaderState;

/// Lifecycle state of a [`ReplicationService`](super::ReplicationService).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Created => write!(f, "Created"),
            ServiceState::Running => write!(f, "Running"),
            ServiceState::ShuttingDown => write!(f, "ShuttingDown"),
            ServiceState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Point-in-time health snapshot.
///
/// Built from cached state only; taking one performs no network I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub state: ServiceState,
    pub reader_state: ReaderState,
    pub topic: String,
    /// Running and currently connected to the stream.
    pub ready: bool,
    /// Running and the reader is not backing off from a failed connect.
    /// A reader between sessions (`Reconnecting`) still counts as healthy.
    pub healthy: bool,
    pub apply: ApplyStats,
    /// Hashes currently held by the seen set.
    pub seen_events: usize,
}

impl HealthCheck {
    pub(crate) fn evaluate(
        state: ServiceState,
        reader_state: ReaderState,
        topic: String,
        apply: ApplyStats,
        seen_events: usize,
    ) -> Self {
        let running = state == ServiceState::Running;
        let ready = running && reader_state == ReaderState::Streaming;
        let healthy = running && !matches!(reader_state, ReaderState::Failed | ReaderState::Stopped);
        Self {
            state,
            reader_state,
            topic,
            ready,
            healthy,
            apply,
            seen_events,
        }
    }
}
