//! Session state and memory
//!
//! A `Session` is the caller-scoped container that outlives any single
//! message exchange: conversation history, keyed memory of successful
//! results, and metadata. The `SessionManager` owns the lifecycle
//! (create-on-miss, capped history, TTL expiry) and hands out per-session
//! locks so concurrent turns for the *same* caller serialize while distinct
//! sessions proceed independently.
//!
//! Backing storage is pluggable behind [`SessionStore`]; the default is an
//! in-memory map. Persistence is reached only through the async `load`/`save`
//! pair and is never assumed synchronous.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::error::Result;

/// How long a session lives relative to its last activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Discarded minutes after the caller goes quiet
    Ephemeral,
    /// The default conversational lifetime
    Session,
    /// Kept across calls for returning callers
    LongTerm,
}

/// Who said what, when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Agent,
}

impl HistoryEntry {
    pub fn caller(content: impl Into<String>) -> Self {
        Self {
            role: Role::Caller,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A cached successful result, keyed by domain in the session memory map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub value: serde_json::Value,
    pub stored_at: DateTime<Utc>,
}

/// Caller-scoped conversational state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub caller_id: Option<String>,
    pub history: Vec<HistoryEntry>,
    pub session_memory: HashMap<String, MemoryEntry>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub current_thread_id: Option<String>,
    pub storage: StorageKind,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            caller_id: None,
            history: Vec::new(),
            session_memory: HashMap::new(),
            metadata: HashMap::new(),
            current_thread_id: None,
            storage: StorageKind::Session,
            created_at: now,
            last_active_at: now,
        }
    }

    /// Whether the storage-kind TTL has elapsed since the last activity.
    pub fn is_expired(&self, config: &SessionConfig, now: DateTime<Utc>) -> bool {
        let ttl = match self.storage {
            StorageKind::Ephemeral => config.ephemeral_ttl,
            StorageKind::Session => config.session_ttl,
            StorageKind::LongTerm => config.long_term_ttl,
        };
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        now - self.last_active_at > ttl
    }

    /// The most recent `n` history entries, oldest first.
    pub fn recent_history(&self, n: usize) -> &[HistoryEntry] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    /// Append a history entry under the cap; used by turn pipelines that
    /// already hold the session lock.
    pub fn push_history(&mut self, entry: HistoryEntry, cap: usize) {
        self.history.push(entry);
        if self.history.len() > cap {
            let excess = self.history.len() - cap;
            self.history.drain(..excess);
        }
        self.touch();
    }
}

/// Pluggable persistence boundary for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<Session>>;
    async fn save(&self, session: &Session) -> Result<()>;
}

/// Default store: sessions live and die with the process.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.lock().await.get(session_id).cloned())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.sessions
            .lock()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }
}

/// Owns every live session and the per-session locking discipline.
pub struct SessionManager {
    config: SessionConfig,
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    store: Arc<dyn SessionStore>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, store: Arc<dyn SessionStore>) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            store,
        }
    }

    pub fn in_memory(config: SessionConfig) -> Self {
        Self::new(config, Arc::new(InMemorySessionStore::new()))
    }

    /// Fetch the session, creating it (or loading it from the store) on miss.
    pub async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<Session>> {
        if let Some(existing) = self.sessions.read().await.get(session_id) {
            return Arc::clone(existing);
        }

        let loaded = self.store.load(session_id).await.ok().flatten();
        let mut sessions = self.sessions.write().await;
        // A racing turn may have created it between the read and write locks
        Arc::clone(sessions.entry(session_id.to_string()).or_insert_with(|| {
            let session = loaded.unwrap_or_else(|| {
                info!(session_id = %session_id, "creating session");
                Session::new(session_id)
            });
            Arc::new(Mutex::new(session))
        }))
    }

    /// Exclusive guard for one session, serializing concurrent turns for the
    /// same caller. Turns for other sessions are unaffected.
    pub async fn lock_session(&self, session_id: &str) -> OwnedMutexGuard<Session> {
        let session = self.get_or_create(session_id).await;
        session.lock_owned().await
    }

    /// Append a history entry, enforcing the configured cap.
    pub async fn add_to_history(&self, session_id: &str, entry: HistoryEntry) {
        let session = self.get_or_create(session_id).await;
        let mut session = session.lock().await;
        session.history.push(entry);
        let cap = self.config.history_cap;
        if session.history.len() > cap {
            let excess = session.history.len() - cap;
            session.history.drain(..excess);
        }
        session.touch();
    }

    /// Cache a successful result under a domain key.
    pub async fn store_in_memory(&self, session_id: &str, key: &str, value: serde_json::Value) {
        let session = self.get_or_create(session_id).await;
        let mut session = session.lock().await;
        debug!(session_id = %session_id, key = %key, "storing session memory");
        session.session_memory.insert(
            key.to_string(),
            MemoryEntry {
                value,
                stored_at: Utc::now(),
            },
        );
        session.touch();
    }

    pub async fn get_from_memory(&self, session_id: &str, key: &str) -> Option<MemoryEntry> {
        let session = self.get_or_create(session_id).await;
        let session = session.lock().await;
        session.session_memory.get(key).cloned()
    }

    pub async fn has_in_memory(&self, session_id: &str, key: &str) -> bool {
        self.get_from_memory(session_id, key).await.is_some()
    }

    /// Drop a cached result, forcing the next turn to re-query.
    pub async fn invalidate_memory(&self, session_id: &str, key: &str) {
        let session = self.get_or_create(session_id).await;
        let mut session = session.lock().await;
        session.session_memory.remove(key);
    }

    /// Ids of sessions currently held in memory.
    pub async fn active_sessions(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Evict sessions whose TTL has elapsed. Returns how many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut expired = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (id, session) in sessions.iter() {
                if session.lock().await.is_expired(&self.config, now) {
                    expired.push(id.clone());
                }
            }
        }
        let mut sessions = self.sessions.write().await;
        for id in &expired {
            sessions.remove(id);
            debug!(session_id = %id, "expired session evicted");
        }
        expired.len()
    }

    /// Flush one session through the persistence boundary.
    pub async fn persist(&self, session_id: &str) -> Result<()> {
        let session = self.get_or_create(session_id).await;
        let snapshot = session.lock().await.clone();
        self.store.save(&snapshot).await
    }
}
