// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Repository contract: the persistence interface the replicator drives.
//!
//! The storage engine behind it is not ours. The replicator only calls the
//! seven operations below and assumes each one is atomic and safe to call
//! with an entity that has already been applied.
//!
//! # Example
//!
//! ```rust,no_run
//! use event_replication::repository::{BoxFuture, Entity, Repository, RepositoryError};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct WorkLog { id: String, status: String }
//!
//! impl Entity for WorkLog {
//!     type Id = String;
//!     fn id(&self) -> String { self.id.clone() }
//! }
//!
//! struct PostgresWorkLogs { /* ... */ }
//!
//! impl Repository<WorkLog> for PostgresWorkLogs {
//!     fn create(&self, _entity: WorkLog) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!     fn save(&self, _entity: WorkLog) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!     fn get(&self, id: &String) -> BoxFuture<'_, WorkLog> {
//!         let id = id.clone();
//!         Box::pin(async move { Err(RepositoryError::NotFound(id)) })
//!     }
//!     fn get_all(&self) -> BoxFuture<'_, Vec<WorkLog>> {
//!         Box::pin(async move { Ok(vec![]) })
//!     }
//!     fn delete(&self, _entity: WorkLog) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!     fn exists(&self, _id: &String) -> BoxFuture<'_, bool> {
//!         Box::pin(async move { Ok(false) })
//!     }
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::RwLock;

/// Result type for repository operations.
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Type alias for boxed repository futures (keeps trait signatures readable).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = RepositoryResult<T>> + Send + 'a>>;

/// Errors a repository may report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("entity {0} not found")]
    NotFound(String),

    #[error("entity {0} already exists")]
    AlreadyExists(String),

    #[error("storage backend: {0}")]
    Backend(String),
}

/// Capabilities an entity needs to be replicated: serialize, deserialize,
/// and identify.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Identifier type.
    type Id: Eq + Hash + Clone + Debug + Display + Send + Sync + 'static;

    /// The entity's identifier.
    fn id(&self) -> Self::Id;
}

/// Persistence operations for entities of type `E`.
pub trait Repository<E: Entity>: Send + Sync + 'static {
    /// Insert a new entity.
    fn create(&self, entity: E) -> BoxFuture<'_, ()>;

    /// Insert or replace an entity.
    fn save(&self, entity: E) -> BoxFuture<'_, ()>;

    /// Fetch one entity by id.
    fn get(&self, id: &E::Id) -> BoxFuture<'_, E>;

    /// Fetch every entity.
    fn get_all(&self) -> BoxFuture<'_, Vec<E>>;

    /// Remove an entity.
    fn delete(&self, entity: E) -> BoxFuture<'_, ()>;

    /// Check whether an id is present.
    fn exists(&self, id: &E::Id) -> BoxFuture<'_, bool>;

    /// Derive the id of an entity.
    ///
    /// Default: [`Entity::id`]. Stores that assign ids override this.
    fn get_id(&self, entity: &E) -> BoxFuture<'_, E::Id> {
        let id = entity.id();
        Box::pin(async move { Ok(id) })
    }
}

/// In-memory repository for standalone mode and tests.
///
/// - `create` on an existing id fails with `AlreadyExists` and leaves the
///   stored entity untouched.
/// - `delete` of an absent id is a no-op.
pub struct InMemoryRepository<E: Entity> {
    items: RwLock<HashMap<E::Id, E>>,
}

impl<E: Entity> InMemoryRepository<E> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored entities.
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

impl<E: Entity> Default for InMemoryRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Repository<E> for InMemoryRepository<E> {
    fn create(&self, entity: E) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let id = entity.id();
            let mut items = self.items.write().await;
            if items.contains_key(&id) {
                return Err(RepositoryError::AlreadyExists(id.to_string()));
            }
            tracing::trace!(id = %id, "InMemory: create");
            items.insert(id, entity);
            Ok(())
        })
    }

    fn save(&self, entity: E) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let id = entity.id();
            tracing::trace!(id = %id, "InMemory: save");
            self.items.write().await.insert(id, entity);
            Ok(())
        })
    }

    fn get(&self, id: &E::Id) -> BoxFuture<'_, E> {
        let id = id.clone();
        Box::pin(async move {
            self.items
                .read()
                .await
                .get(&id)
                .cloned()
                .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
        })
    }

    fn get_all(&self) -> BoxFuture<'_, Vec<E>> {
        Box::pin(async move { Ok(self.items.read().await.values().cloned().collect()) })
    }

    fn delete(&self, entity: E) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let id = entity.id();
            if self.items.write().await.remove(&id).is_none() {
                tracing::trace!(id = %id, "InMemory: delete of absent entity");
            }
            Ok(())
        })
    }

    fn exists(&self, id: &E::Id) -> BoxFuture<'_, bool> {
        let id = id.clone();
        Box::pin(async move { Ok(self.items.read().await.contains_key(&id)) })
    }
}
