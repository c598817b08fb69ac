//! Inbound task wiring: one stream reader feeding one applier.

use crate::applier::{Applier, ApplyStats};
use crate::config::ReplicationConfig;
use crate::dedup::SharedSeenEvents;
use crate::error::Result;
use crate::repository::{Entity, Repository};
use crate::stream::{ReaderState, StreamReader};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handles and observers for the spawned inbound tasks.
pub(super) struct InboundTasks {
    reader: JoinHandle<String>,
    applier: JoinHandle<ApplyStats>,
    pub(super) reader_state: watch::Receiver<ReaderState>,
    pub(super) apply_stats: watch::Receiver<ApplyStats>,
}

/// Spawn the reader and applier for `config.topic`.
pub(super) fn spawn<E: Entity, R: Repository<E>>(
    config: &ReplicationConfig,
    repo: Arc<R>,
    seen: SharedSeenEvents,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<InboundTasks> {
    let reader = StreamReader::from_config(config)?;
    let applier = Applier::from_config(config, repo, seen);
    let reader_state = reader.state_receiver();
    let apply_stats = applier.stats_receiver();

    let (tx, rx) = mpsc::channel(config.settings.stream.channel_capacity);

    let reader = tokio::spawn(reader.run(tx, shutdown_rx.clone()));
    let applier = tokio::spawn(applier.run(rx, shutdown_rx));
    info!(
        topic = %config.topic,
        channel_capacity = config.settings.stream.channel_capacity,
        "Spawned stream reader and applier"
    );

    Ok(InboundTasks {
        reader,
        applier,
        reader_state,
        apply_stats,
    })
}

impl InboundTasks {
    /// Wait for both tasks (shutdown must already be signalled).
    ///
    /// Returns the applier's totals; if the applier did not finish in time,
    /// the last published totals.
    pub(super) async fn join(self, drain_timeout: Duration) -> ApplyStats {
        match tokio::time::timeout(drain_timeout, self.reader).await {
            Ok(Ok(last_event_id)) => {
                debug!(last_event_id = %last_event_id, "Stream reader joined");
            }
            Ok(Err(e)) => warn!(error = %e, "Stream reader panicked during shutdown"),
            Err(_) => warn!("Stream reader timed out during shutdown"),
        }

        match tokio::time::timeout(drain_timeout, self.applier).await {
            Ok(Ok(stats)) => {
                debug!("Applier joined");
                stats
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Applier panicked during shutdown");
                *self.apply_stats.borrow()
            }
            Err(_) => {
                warn!("Applier timed out during shutdown");
                *self.apply_stats.borrow()
            }
        }
    }
}
