use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{Context, error::Result};

/// Session information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub graph_id: String,
    pub current_task_id: String,
    pub status_message: Option<String>,
    pub context: Context,
}

impl Session {
    pub fn new_from_task(sid: impl Into<String>, task_name: &str) -> Self {
        Self {
            id: sid.into(),
            graph_id: "default".to_string(),
            current_task_id: task_name.to_string(),
            status_message: None,
            context: Context::new(),
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

/// Trait for storing and retrieving sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: Session) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Session>>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn count(&self) -> Result<usize>;
}

/// In-memory implementation of SessionStorage
#[derive(Default)]
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, Session>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: Session) -> Result<()> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.sessions.len())
    }
}

/// One async mutex per session id.
///
/// Holding the guard serializes every load → execute → save cycle for that
/// session while unrelated sessions proceed in parallel.
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry for a session nobody is holding or waiting on
    pub fn forget(&self, session_id: &str) {
        self.locks
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn in_memory_storage_round_trip() {
        let storage = InMemorySessionStorage::new();
        let session = Session::new_from_task("s1", "start");
        session.context.set("k", "v").await;
        storage.save(session).await.unwrap();

        let loaded = storage.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.current_task_id, "start");
        assert_eq!(loaded.context.get_sync::<String>("k").as_deref(), Some("v"));
        assert_eq!(storage.count().await.unwrap(), 1);

        storage.delete("s1").await.unwrap();
        assert!(storage.get("s1").await.unwrap().is_none());
        assert_eq!(storage.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn same_session_is_serialized() {
        let locks = SessionLocks::new();
        let guard = locks.acquire("a").await;

        let contender = locks.clone();
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), contender.acquire("a")).await;
        assert!(blocked.is_err());

        drop(guard);
        let acquired =
            tokio::time::timeout(Duration::from_millis(50), contender.acquire("a")).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn different_sessions_do_not_block() {
        let locks = SessionLocks::new();
        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn forget_keeps_held_locks() {
        let locks = SessionLocks::new();
        let guard = locks.acquire("a").await;
        locks.forget("a");
        assert_eq!(locks.len(), 1);

        drop(guard);
        locks.forget("a");
        assert!(locks.is_empty());
    }
}
