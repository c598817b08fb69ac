//! # Event Replication
//!
//! Replicates a repository-backed entity across independent service instances
//! without a shared database: every local mutation becomes a content-hashed
//! event that is broadcast over HTTP, and every instance applies the events
//! it receives from a server-sent event stream to its own repository.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                          ReplicationService                               │
//! │                                                                           │
//! │  create/save/delete ──► Event (seal) ──► Transport ──► POST /event/topic  │
//! │                                                             │             │
//! │                                                      (ingress, broker)    │
//! │                                                             │             │
//! │  ┌────────────┐    ┌──────────────┐    ┌──────────────────────────────┐  │
//! │  │ Repository │◄───│   Applier    │◄───│ StreamReader                 │  │
//! │  │ (yours)    │    │ (dedup, kind │    │ (GET /eventstream/topic,     │  │
//! │  └────────────┘    │  dispatch)   │    │  Last-Event-ID resume)       │  │
//! │        ▲           └──────────────┘    └──────────────────────────────┘  │
//! │        │                                                                  │
//! │  get/get_all/exists                                                       │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Delivery is at-least-once with a bounded retry budget.
//! - Redelivery of the same event is applied once (content-hash dedup).
//! - Events on one topic are applied in arrival order.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_replication::{Entity, InMemoryRepository, ReplicationConfig, ReplicationService};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct WorkLog { id: String, status: String }
//!
//! impl Entity for WorkLog {
//!     type Id = String;
//!     fn id(&self) -> String { self.id.clone() }
//! }
//!
//! #[tokio::main]
//! async fn main() -> event_replication::Result<()> {
//!     let config = ReplicationConfig {
//!         broadcast_uri: "http://ingress:8080".into(),
//!         stream_uri: "http://eventstream:8081".into(),
//!         topic: "worklog".into(),
//!         event_type_prefix: "WorkLog".into(),
//!         ..Default::default()
//!     };
//!     let repo = Arc::new(InMemoryRepository::<WorkLog>::new());
//!
//!     let mut service = ReplicationService::start_http(config, repo).await?;
//!     service.create(WorkLog { id: "42".into(), status: "open".into() }).await?;
//!
//!     let stats = service.shutdown().await?;
//!     println!("applied {} events", stats.applied);
//!     Ok(())
//! }
//! ```

pub mod applier;
pub mod config;
pub mod dedup;
pub mod error;
pub mod event;
pub mod metrics;
pub mod repository;
pub mod resilience;
pub mod service;
pub mod stream;
pub mod transport;

// Re-exports for convenience
pub use applier::{Applier, ApplyOutcome, ApplyStats};
pub use config::{LocalWrite, ReplicationConfig, ReplicationSettings};
pub use dedup::SeenEvents;
pub use error::{ReplicationError, Result};
pub use event::{Event, EventKind, EVENT_VERSION};
pub use repository::{Entity, InMemoryRepository, Repository, RepositoryError};
pub use service::{HealthCheck, ReplicationService, ServiceState};
pub use stream::{parse_line, Frame, ReaderState, StreamReader};
pub use transport::{HttpTransport, Transport};
