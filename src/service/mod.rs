// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication service: the façade callers use instead of the repository.
//!
//! Ties together:
//! - Outbound broadcast via a [`Transport`]
//! - The inbound [`StreamReader`](crate::stream::StreamReader) and
//!   [`Applier`](crate::applier::Applier) tasks
//! - The local [`Repository`] for reads (and writes, in write-through mode)
//!
//! # Architecture
//!
//! ```text
//!  create/save/delete ──▶ Event (sealed) ──▶ Transport ──▶ ingress
//!                                                            │
//!                                                       (broker)
//!                                                            │
//!  get/get_all/exists ──▶ Repository ◀── Applier ◀── mpsc ◀── StreamReader
//! ```
//!
//! With [`LocalWrite::WriteThrough`] a mutation is also applied to the local
//! repository once the broadcast succeeds, and its hash is marked as seen so
//! the copy coming back over the stream is skipped.

mod inbound;
mod types;

pub use types::{HealthCheck, ServiceState};

use crate::applier::ApplyStats;
use crate::config::{LocalWrite, ReplicationConfig};
use crate::dedup::{SeenEvents, SharedSeenEvents};
use crate::error::{ReplicationError, Result};
use crate::event::{Event, EventKind};
use crate::metrics;
use crate::repository::{Entity, Repository};
use crate::stream::ReaderState;
use crate::transport::{HttpTransport, Transport};
use inbound::InboundTasks;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How long shutdown waits for each inbound task.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Replicated repository façade for entities of type `E`.
///
/// Mutations are broadcast; reads go straight to the local repository and
/// are never affected by the stream's state.
pub struct ReplicationService<E: Entity, R: Repository<E>, X: Transport = HttpTransport> {
    config: ReplicationConfig,
    repo: Arc<R>,
    transport: Arc<X>,
    seen: SharedSeenEvents,

    /// Service state (broadcast to watchers)
    state_tx: watch::Sender<ServiceState>,
    state_rx: watch::Receiver<ServiceState>,

    shutdown_tx: watch::Sender<bool>,

    reader_state: watch::Receiver<ReaderState>,
    apply_stats: watch::Receiver<ApplyStats>,

    /// Taken by shutdown
    tasks: Option<InboundTasks>,

    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity, R: Repository<E>> ReplicationService<E, R, HttpTransport> {
    /// Start with the HTTP transport described by `config`.
    pub async fn start_http(config: ReplicationConfig, repo: Arc<R>) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(HttpTransport::from_config(&config)?);
        Self::start(config, repo, transport).await
    }
}

impl<E: Entity, R: Repository<E>, X: Transport> ReplicationService<E, R, X> {
    /// Validate `config`, spawn the inbound tasks and return a running service.
    pub async fn start(config: ReplicationConfig, repo: Arc<R>, transport: Arc<X>) -> Result<Self> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(ServiceState::Created);
        metrics::set_service_state("Created");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let seen = SeenEvents::shared(config.settings.dedup.capacity);

        info!(
            topic = %config.topic,
            prefix = %config.event_type_prefix,
            broadcast_uri = %config.broadcast_uri,
            stream_uri = %config.stream_uri,
            local_write = ?config.local_write,
            "Starting replication service"
        );

        let tasks = inbound::spawn(&config, Arc::clone(&repo), Arc::clone(&seen), shutdown_rx)?;
        let reader_state = tasks.reader_state.clone();
        let apply_stats = tasks.apply_stats.clone();

        state_tx.send_replace(ServiceState::Running);
        metrics::set_service_state("Running");
        info!(topic = %config.topic, "Replication service running");

        Ok(Self {
            config,
            repo,
            transport,
            seen,
            state_tx,
            state_rx,
            shutdown_tx,
            reader_state,
            apply_stats,
            tasks: Some(tasks),
            _entity: PhantomData,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────

    /// Broadcast a `Created` event for `entity`.
    pub async fn create(&self, entity: E) -> Result<()> {
        self.mutate(EventKind::Created, entity).await
    }

    /// Broadcast an `Updated` event for `entity`.
    pub async fn save(&self, entity: E) -> Result<()> {
        self.mutate(EventKind::Updated, entity).await
    }

    /// Broadcast a `Deleted` event for `entity`.
    pub async fn delete(&self, entity: E) -> Result<()> {
        self.mutate(EventKind::Deleted, entity).await
    }

    async fn mutate(&self, kind: EventKind, entity: E) -> Result<()> {
        if self.state() != ServiceState::Running {
            return Err(ReplicationError::Shutdown);
        }

        let event = Event::for_entity(kind, &self.config.event_type_prefix, &entity)?.seal()?;
        let event_sha = event.event_sha.clone();
        let write_through = self.config.local_write == LocalWrite::WriteThrough;

        // Mark before sending: the echo can arrive before send() returns.
        if write_through {
            self.seen.lock().await.insert(&event_sha);
        }

        if let Err(e) = self.transport.send(event).await {
            metrics::record_local_mutation(&self.config.topic, kind.as_str(), false);
            if write_through {
                self.seen.lock().await.forget(&event_sha);
            }
            warn!(topic = %self.config.topic, kind = %kind, event_sha = %event_sha, error = %e, "Broadcast failed");
            return Err(e);
        }
        metrics::record_local_mutation(&self.config.topic, kind.as_str(), true);
        debug!(topic = %self.config.topic, kind = %kind, event_sha = %event_sha, "Broadcast event");

        if write_through {
            let applied = match kind {
                EventKind::Created => self.repo.create(entity).await,
                EventKind::Updated => self.repo.save(entity).await,
                EventKind::Deleted => self.repo.delete(entity).await,
            };
            applied?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads (pass-through)
    // ─────────────────────────────────────────────────────────────────────

    pub async fn get(&self, id: &E::Id) -> Result<E> {
        Ok(self.repo.get(id).await?)
    }

    pub async fn get_all(&self) -> Result<Vec<E>> {
        Ok(self.repo.get_all().await?)
    }

    pub async fn exists(&self, id: &E::Id) -> Result<bool> {
        Ok(self.repo.exists(id).await?)
    }

    pub async fn get_id(&self, entity: &E) -> Result<E::Id> {
        Ok(self.repo.get_id(entity).await?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Monitoring
    // ─────────────────────────────────────────────────────────────────────

    /// Get current service state.
    pub fn state(&self) -> ServiceState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ServiceState> {
        self.state_rx.clone()
    }

    /// Current stream reader state.
    pub fn reader_state(&self) -> ReaderState {
        *self.reader_state.borrow()
    }

    /// Get a receiver to watch reader state changes.
    pub fn reader_state_receiver(&self) -> watch::Receiver<ReaderState> {
        self.reader_state.clone()
    }

    /// Applier totals so far.
    pub fn apply_stats(&self) -> ApplyStats {
        *self.apply_stats.borrow()
    }

    /// Health snapshot for monitoring endpoints. No network I/O.
    pub async fn health(&self) -> HealthCheck {
        let seen_events = self.seen.lock().await.len();
        HealthCheck::evaluate(
            self.state(),
            self.reader_state(),
            self.config.topic.clone(),
            self.apply_stats(),
            seen_events,
        )
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn transport(&self) -> &Arc<X> {
        &self.transport
    }

    /// Stop the inbound tasks and return the applier's final totals.
    ///
    /// Shutdown sequence:
    /// 1. Signal reader and applier
    /// 2. Wait for both (bounded per task)
    /// 3. Mark the service stopped
    pub async fn shutdown(&mut self) -> Result<ApplyStats> {
        let Some(tasks) = self.tasks.take() else {
            return Err(ReplicationError::InvalidState {
                expected: ServiceState::Running.to_string(),
                actual: self.state().to_string(),
            });
        };

        info!(topic = %self.config.topic, "Shutting down replication service");
        self.state_tx.send_replace(ServiceState::ShuttingDown);
        metrics::set_service_state("ShuttingDown");

        self.shutdown_tx.send_replace(true);
        let stats = tasks.join(DRAIN_TIMEOUT).await;

        self.state_tx.send_replace(ServiceState::Stopped);
        metrics::set_service_state("Stopped");
        info!(
            topic = %self.config.topic,
            applied = stats.applied,
            duplicates = stats.duplicates,
            "Replication service stopped"
        );
        Ok(stats)
    }
}

impl<E: Entity, R: Repository<E>, X: Transport> Drop for ReplicationService<E, R, X> {
    fn drop(&mut self) {
        // Tasks outlive the handle otherwise
        self.shutdown_tx.send_replace(true);
    }
}
