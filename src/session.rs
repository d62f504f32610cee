//! Per-session context storage.
//!
//! The engine is stateless; everything a dialogue knows lives in its
//! [`SessionContext`], owned here. Each session wraps its context in a
//! `tokio::Mutex` so the host processes at most one cascade per session at
//! a time, while many sessions run concurrently.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tokio::sync::Mutex;
use tracing::info;

use crate::context::SessionContext;

/// One live dialogue. Locking `context` serializes cascades for the
/// session.
#[derive(Debug, Default)]
pub struct Session {
    pub context: Mutex<SessionContext>,
}

pub type SharedSession = Arc<Session>;

/// Factory and cache for per-session state instances.
#[async_trait]
pub trait SessionStoreType: Send + Sync + Debug {
    /// Returns an existing session if it exists.
    async fn get(&self, session_id: &str) -> Option<SharedSession>;
    /// Returns an existing session or creates a new one with empty context.
    async fn get_or_create(&self, session_id: &str) -> SharedSession;
    /// Explicitly removes a session from the store.
    async fn remove(&self, session_id: &str);
    /// Clears all sessions (typically for tests or shutdown).
    fn clear(&self);
    /// Number of live sessions.
    async fn count(&self) -> u64;
}

pub type SessionStore = Arc<dyn SessionStoreType>;

/// In-memory store with idle-based expiry: sessions are ephemeral and
/// vanish once a dialogue goes quiet for the configured TTL.
#[derive(Clone, Debug)]
pub struct InMemorySessionStore {
    cache: Cache<String, SharedSession>,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration) -> Arc<Self> {
        let cache = Cache::builder()
            .time_to_idle(ttl)
            .eviction_listener(|key: Arc<String>, _value, cause| {
                info!("session expired: key={}, cause={:?}", key, cause);
            })
            .build();
        Arc::new(Self { cache })
    }
}

#[async_trait]
impl SessionStoreType for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Option<SharedSession> {
        self.cache.get(session_id).await
    }

    async fn get_or_create(&self, session_id: &str) -> SharedSession {
        match self.cache.get(session_id).await {
            Some(session) => session,
            None => {
                let session = Arc::new(Session::default());
                self.cache.insert(session_id.to_string(), session.clone()).await;
                session
            }
        }
    }

    async fn remove(&self, session_id: &str) {
        self.cache.invalidate(session_id).await;
    }

    fn clear(&self) {
        self.cache.invalidate_all();
    }

    async fn count(&self) -> u64 {
        // entry_count is eventually consistent until pending tasks run
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_and_retrieve_keeps_context() {
        let store = InMemorySessionStore::new(Duration::from_secs(60));
        let session = store.get_or_create("abc123").await;
        session.context.lock().await.insert("foo", json!("bar"));

        let again = store.get_or_create("abc123").await;
        assert_eq!(again.context.lock().await.get("foo"), Some(&json!("bar")));
    }

    #[tokio::test]
    async fn removal_resets_state() {
        let store = InMemorySessionStore::new(Duration::from_secs(60));
        let session = store.get_or_create("abc123").await;
        session.context.lock().await.insert("foo", json!("bar"));

        store.remove("abc123").await;
        assert!(store.get("abc123").await.is_none());

        let fresh = store.get_or_create("abc123").await;
        assert_eq!(fresh.context.lock().await.get("foo"), None);
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let store = InMemorySessionStore::new(Duration::from_secs(60));
        store.get_or_create("one").await;
        store.get_or_create("two").await;
        store.clear();

        let recreated = store.get_or_create("one").await;
        assert!(recreated.context.lock().await.as_map().is_empty());
    }

    #[tokio::test]
    async fn sessions_serialize_access_through_the_lock() {
        let store = InMemorySessionStore::new(Duration::from_secs(60));
        let session = store.get_or_create("locked").await;

        let guard = session.context.lock().await;
        assert!(session.context.try_lock().is_err());
        drop(guard);
        assert!(session.context.try_lock().is_ok());
    }
}
