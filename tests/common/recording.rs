//! Repository wrapper that records every mutating call.

use super::WorkLog;
use event_replication::repository::BoxFuture;
use event_replication::{InMemoryRepository, Repository, RepositoryError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Delegates to an [`InMemoryRepository`] and logs `"create:<id>"`,
/// `"save:<id>"` and `"delete:<id>"` in call order. While failing, writes
/// are recorded and rejected with a backend error.
#[derive(Default)]
pub struct RecordingRepository {
    inner: InMemoryRepository<WorkLog>,
    calls: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls of one kind (`"create"`, `"save"`, `"delete"`).
    pub fn count(&self, kind: &str) -> usize {
        let prefix = format!("{}:", kind);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, kind: &str, entity: &WorkLog) -> bool {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", kind, entity.id));
        self.failing.load(Ordering::SeqCst)
    }
}

fn rejected() -> BoxFuture<'static, ()> {
    Box::pin(async { Err(RepositoryError::Backend("disk full".to_string())) })
}

impl Repository<WorkLog> for RecordingRepository {
    fn create(&self, entity: WorkLog) -> BoxFuture<'_, ()> {
        if self.record("create", &entity) {
            return rejected();
        }
        self.inner.create(entity)
    }

    fn save(&self, entity: WorkLog) -> BoxFuture<'_, ()> {
        if self.record("save", &entity) {
            return rejected();
        }
        self.inner.save(entity)
    }

    fn get(&self, id: &String) -> BoxFuture<'_, WorkLog> {
        self.inner.get(id)
    }

    fn get_all(&self) -> BoxFuture<'_, Vec<WorkLog>> {
        self.inner.get_all()
    }

    fn delete(&self, entity: WorkLog) -> BoxFuture<'_, ()> {
        if self.record("delete", &entity) {
            return rejected();
        }
        self.inner.delete(entity)
    }

    fn exists(&self, id: &String) -> BoxFuture<'_, bool> {
        self.inner.exists(id)
    }
}
