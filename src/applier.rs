//! Deduplicating applier: raw stream payloads → repository calls.
//!
//! # Design
//!
//! ```text
//! mpsc<String> ──▶ blank? ──▶ KeepAlive
//!                    │
//!                    ▼
//!                 decode ──err──▶ Discarded
//!                    │
//!                    ▼
//!             seen(eventSHA)? ──yes──▶ Duplicate
//!                    │ (recorded now, before the repository call)
//!                    ▼
//!             kind(prefix) ──none──▶ UnknownKind
//!                    │
//!                    ▼
//!   Created → create / Updated → save / Deleted → delete
//!                    │
//!                    └──err──▶ RepositoryFailed (logged, not retried)
//! ```
//!
//! Nothing here returns an error: every failure is logged and counted and
//! the next payload is processed.

use crate::config::ReplicationConfig;
use crate::dedup::SharedSeenEvents;
use crate::event::{Event, EventKind};
use crate::metrics;
use crate::repository::{Entity, Repository};
use crate::resilience::{RateLimitConfig, RateLimiter};
use crate::stream::wait_for_shutdown;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// What happened to one inbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Empty payload.
    KeepAlive,
    /// Undecodable event or payload, or failed hash check.
    Discarded,
    /// Content hash already seen.
    Duplicate,
    /// Repository call succeeded.
    Applied(EventKind),
    /// Event type not for this prefix.
    UnknownKind,
    /// Repository call failed.
    RepositoryFailed(EventKind),
}

impl ApplyOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ApplyOutcome::KeepAlive => "keep_alive",
            ApplyOutcome::Discarded => "discarded",
            ApplyOutcome::Duplicate => "duplicate",
            ApplyOutcome::Applied(_) => "applied",
            ApplyOutcome::UnknownKind => "unknown_kind",
            ApplyOutcome::RepositoryFailed(_) => "failed",
        }
    }
}

/// Running totals kept by [`Applier::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Payloads taken off the channel.
    pub received: u64,
    pub applied: u64,
    pub duplicates: u64,
    pub discarded: u64,
    pub unknown: u64,
    pub failed: u64,
    pub keep_alives: u64,
}

impl ApplyStats {
    pub fn record(&mut self, outcome: ApplyOutcome) {
        self.received += 1;
        match outcome {
            ApplyOutcome::KeepAlive => self.keep_alives += 1,
            ApplyOutcome::Discarded => self.discarded += 1,
            ApplyOutcome::Duplicate => self.duplicates += 1,
            ApplyOutcome::Applied(_) => self.applied += 1,
            ApplyOutcome::UnknownKind => self.unknown += 1,
            ApplyOutcome::RepositoryFailed(_) => self.failed += 1,
        }
    }
}

/// Applies inbound events for one (topic, entity) pair.
pub struct Applier<E: Entity, R: Repository<E>> {
    repo: Arc<R>,
    topic: String,
    prefix: String,
    seen: SharedSeenEvents,
    verify_content_hash: bool,
    rate_limiter: Option<RateLimiter>,
    stats_tx: watch::Sender<ApplyStats>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity, R: Repository<E>> Applier<E, R> {
    pub fn new(
        repo: Arc<R>,
        topic: impl Into<String>,
        prefix: impl Into<String>,
        seen: SharedSeenEvents,
    ) -> Self {
        let (stats_tx, _) = watch::channel(ApplyStats::default());
        Self {
            repo,
            topic: topic.into(),
            prefix: prefix.into(),
            seen,
            verify_content_hash: false,
            rate_limiter: None,
            stats_tx,
            _entity: PhantomData,
        }
    }

    /// Applier configured from the dedup and apply settings.
    pub fn from_config(config: &ReplicationConfig, repo: Arc<R>, seen: SharedSeenEvents) -> Self {
        Self::new(repo, config.topic.clone(), config.event_type_prefix.clone(), seen)
            .with_hash_verification(config.settings.dedup.verify_content_hash)
            .with_rate_limit(config.settings.apply.rate_limit_config())
    }

    /// Recompute each event's hash and discard mismatches.
    pub fn with_hash_verification(mut self, enabled: bool) -> Self {
        self.verify_content_hash = enabled;
        self
    }

    /// Throttle repository calls (`None` = unlimited).
    pub fn with_rate_limit(mut self, config: Option<RateLimitConfig>) -> Self {
        self.rate_limiter = config.map(RateLimiter::new);
        self
    }

    /// Watch the running totals.
    pub fn stats_receiver(&self) -> watch::Receiver<ApplyStats> {
        self.stats_tx.subscribe()
    }

    /// Process one raw payload.
    pub async fn apply(&self, raw: &str) -> ApplyOutcome {
        if raw.trim().is_empty() {
            debug!("Empty payload (keep-alive)");
            return ApplyOutcome::KeepAlive;
        }

        let event = match Event::decode_str(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, bytes = raw.len(), "Discarding undecodable event");
                return ApplyOutcome::Discarded;
            }
        };

        if !event.is_sealed() {
            warn!(event_type = %event.event_type, "Discarding event without content hash");
            return ApplyOutcome::Discarded;
        }
        if self.verify_content_hash && !event.verify_hash() {
            warn!(
                event_type = %event.event_type,
                event_sha = %event.event_sha,
                "Discarding event with mismatched content hash"
            );
            return ApplyOutcome::Discarded;
        }

        {
            let mut seen = self.seen.lock().await;
            let first_sighting = seen.insert(&event.event_sha);
            metrics::set_seen_events(&self.topic, seen.len());
            if !first_sighting {
                debug!(event_sha = %event.event_sha, "Skipping duplicate event");
                return ApplyOutcome::Duplicate;
            }
        }

        let Some(kind) = event.kind(&self.prefix) else {
            debug!(
                event_type = %event.event_type,
                event_sha = %event.event_sha,
                "Ignoring event of unknown type"
            );
            return ApplyOutcome::UnknownKind;
        };

        let entity: E = match event.decode_payload() {
            Ok(entity) => entity,
            Err(e) => {
                warn!(event_sha = %event.event_sha, kind = %kind, error = %e, "Discarding undecodable payload");
                return ApplyOutcome::Discarded;
            }
        };

        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }

        let id = entity.id();
        let start = Instant::now();
        let result = match kind {
            EventKind::Created => self.repo.create(entity).await,
            EventKind::Updated => self.repo.save(entity).await,
            EventKind::Deleted => self.repo.delete(entity).await,
        };
        metrics::record_apply_latency(&self.topic, kind.as_str(), start.elapsed());

        match result {
            Ok(()) => {
                trace!(event_sha = %event.event_sha, kind = %kind, id = %id, "Applied event");
                ApplyOutcome::Applied(kind)
            }
            Err(e) => {
                warn!(
                    event_sha = %event.event_sha,
                    kind = %kind,
                    id = %id,
                    error = %e,
                    "Repository rejected replicated event"
                );
                ApplyOutcome::RepositoryFailed(kind)
            }
        }
    }

    /// Drain `rx` until it closes or shutdown is signalled.
    pub async fn run(self, mut rx: mpsc::Receiver<String>, mut shutdown: watch::Receiver<bool>) -> ApplyStats {
        let span = info_span!("applier", topic = %self.topic, prefix = %self.prefix);

        async move {
            info!("Starting applier");
            let mut stats = ApplyStats::default();

            loop {
                let raw = tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut shutdown) => {
                        info!("Shutdown signal received");
                        break;
                    }
                    raw = rx.recv() => match raw {
                        Some(raw) => raw,
                        None => {
                            info!("Event channel closed");
                            break;
                        }
                    },
                };

                let outcome = self.apply(&raw).await;
                metrics::record_apply_outcome(&self.topic, outcome.label());
                stats.record(outcome);
                self.stats_tx.send_replace(stats);
            }

            info!(
                received = stats.received,
                applied = stats.applied,
                duplicates = stats.duplicates,
                discarded = stats.discarded,
                unknown = stats.unknown,
                failed = stats.failed,
                "Applier stopped"
            );
            stats
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::SeenEvents;
    use crate::repository::InMemoryRepository;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct WorkLog {
        id: String,
        status: String,
    }

    impl Entity for WorkLog {
        type Id = String;
        fn id(&self) -> String {
            self.id.clone()
        }
    }

    fn log(id: &str, status: &str) -> WorkLog {
        WorkLog {
            id: id.to_string(),
            status: status.to_string(),
        }
    }

    fn frame(kind: EventKind, entity: &WorkLog) -> String {
        Event::for_entity(kind, "WorkLog", entity)
            .unwrap()
            .seal()
            .unwrap()
            .encode_to_string()
            .unwrap()
    }

    fn applier() -> (Applier<WorkLog, InMemoryRepository<WorkLog>>, Arc<InMemoryRepository<WorkLog>>) {
        let repo = Arc::new(InMemoryRepository::new());
        let applier = Applier::new(Arc::clone(&repo), "worklog", "WorkLog", SeenEvents::shared(1024));
        (applier, repo)
    }

    #[tokio::test]
    async fn test_created_then_updated_then_deleted() {
        let (applier, repo) = applier();

        let created = applier.apply(&frame(EventKind::Created, &log("42", "open"))).await;
        assert_eq!(created, ApplyOutcome::Applied(EventKind::Created));
        assert_eq!(repo.get(&"42".to_string()).await.unwrap(), log("42", "open"));

        let updated = applier.apply(&frame(EventKind::Updated, &log("42", "closed"))).await;
        assert_eq!(updated, ApplyOutcome::Applied(EventKind::Updated));
        assert_eq!(repo.get(&"42".to_string()).await.unwrap().status, "closed");

        let deleted = applier.apply(&frame(EventKind::Deleted, &log("42", "closed"))).await;
        assert_eq!(deleted, ApplyOutcome::Applied(EventKind::Deleted));
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_same_frame_twice_is_duplicate() {
        let (applier, repo) = applier();
        let raw = frame(EventKind::Created, &log("1", "open"));

        assert_eq!(applier.apply(&raw).await, ApplyOutcome::Applied(EventKind::Created));
        assert_eq!(applier.apply(&raw).await, ApplyOutcome::Duplicate);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_keep_alive_and_garbage() {
        let (applier, repo) = applier();
        assert_eq!(applier.apply("").await, ApplyOutcome::KeepAlive);
        assert_eq!(applier.apply("   ").await, ApplyOutcome::KeepAlive);
        assert_eq!(applier.apply("{not json").await, ApplyOutcome::Discarded);
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_unsealed_event_discarded() {
        let (applier, _repo) = applier();
        let raw = Event::for_entity(EventKind::Created, "WorkLog", &log("1", "open"))
            .unwrap()
            .encode_to_string()
            .unwrap();
        assert_eq!(applier.apply(&raw).await, ApplyOutcome::Discarded);
    }

    #[tokio::test]
    async fn test_unknown_kind_not_applied() {
        let (applier, repo) = applier();
        let raw = Event::for_entity(EventKind::Created, "Invoice", &log("1", "open"))
            .unwrap()
            .seal()
            .unwrap()
            .encode_to_string()
            .unwrap();
        assert_eq!(applier.apply(&raw).await, ApplyOutcome::UnknownKind);
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_bad_payload_discarded() {
        let (applier, repo) = applier();
        let raw = Event::build(EventKind::Created, "WorkLog", r#"{"id":1}"#)
            .seal()
            .unwrap()
            .encode_to_string()
            .unwrap();
        assert_eq!(applier.apply(&raw).await, ApplyOutcome::Discarded);
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_repository_failure_is_swallowed_and_not_retried() {
        let (applier, repo) = applier();
        repo.create(log("7", "open")).await.unwrap();

        let raw = frame(EventKind::Created, &log("7", "reopened"));
        assert_eq!(
            applier.apply(&raw).await,
            ApplyOutcome::RepositoryFailed(EventKind::Created)
        );
        // Hash recorded before the call: redelivery is a duplicate
        assert_eq!(applier.apply(&raw).await, ApplyOutcome::Duplicate);
        assert_eq!(repo.get(&"7".to_string()).await.unwrap().status, "open");
    }

    #[tokio::test]
    async fn test_hash_verification() {
        let (applier, repo) = applier();
        let applier = applier.with_hash_verification(true);

        let mut event = Event::for_entity(EventKind::Created, "WorkLog", &log("1", "open"))
            .unwrap()
            .seal()
            .unwrap();
        event.event_data = serde_json::to_string(&log("1", "forged")).unwrap();
        let raw = event.encode_to_string().unwrap();

        assert_eq!(applier.apply(&raw).await, ApplyOutcome::Discarded);
        assert!(repo.is_empty().await);

        let good = frame(EventKind::Created, &log("2", "open"));
        assert_eq!(applier.apply(&good).await, ApplyOutcome::Applied(EventKind::Created));
    }

    #[tokio::test]
    async fn test_run_drains_until_channel_closes() {
        let (applier, repo) = applier();
        let mut stats_rx = applier.stats_receiver();
        let (tx, rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let created = frame(EventKind::Created, &log("1", "open"));
        tx.send(created.clone()).await.unwrap();
        tx.send(created).await.unwrap();
        tx.send(String::new()).await.unwrap();
        tx.send("garbage".to_string()).await.unwrap();
        drop(tx);

        let stats = applier.run(rx, shutdown_rx).await;
        assert_eq!(
            stats,
            ApplyStats {
                received: 4,
                applied: 1,
                duplicates: 1,
                discarded: 1,
                unknown: 0,
                failed: 0,
                keep_alives: 1,
            }
        );
        assert_eq!(*stats_rx.borrow_and_update(), stats);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (applier, _repo) = applier();
        let (_tx, rx) = mpsc::channel::<String>(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(applier.run(rx, shutdown_rx));
        shutdown_tx.send(true).unwrap();

        let stats = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.received, 0);
    }

    #[tokio::test]
    async fn test_rate_limited_applier_still_applies() {
        let (applier, repo) = applier();
        let applier = applier.with_rate_limit(Some(RateLimitConfig::conservative()));

        for i in 0..5 {
            let raw = frame(EventKind::Created, &log(&i.to_string(), "open"));
            assert_eq!(applier.apply(&raw).await, ApplyOutcome::Applied(EventKind::Created));
        }
        assert_eq!(repo.len().await, 5);
    }
}
