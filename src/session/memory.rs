//! Bounded in-process session store
//!
//! Sessions live in a map ordered by recency of use. Reads promote an entry
//! to most-recently-used; a save into a full store first evicts the least
//! recently used entry. Expiry is lazy: an entry older than the TTL is
//! dropped when it is read, or by an explicit [`InMemorySessionStore::cleanup_expired`].
//!
//! ```text
//! order (tick → id)    oldest ──────────────────────► newest
//!                      [3:"a"] [7:"c"] [9:"b"]
//!                         ▲                  ▲
//!                    evicted first      last get/save
//! ```
//!
//! A single async mutex serializes every operation. Session counts are
//! small and each operation is O(log n), so one coarse lock is enough.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{Clock, Session, SessionError, SessionStore, SystemClock};
use crate::metrics::{SESSIONS_CACHED, SESSION_EVICTIONS};

/// Default maximum number of cached sessions
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

struct Entry {
    session: Session,
    tick: u64,
}

/// Recency-ordered map: `order` indexes entries by their last-use tick
#[derive(Default)]
struct LruMap {
    entries: HashMap<String, Entry>,
    order: BTreeMap<u64, String>,
    next_tick: u64,
}

impl LruMap {
    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn promote(&mut self, session_id: &str) {
        let tick = self.tick();
        if let Some(entry) = self.entries.get_mut(session_id) {
            self.order.remove(&entry.tick);
            entry.tick = tick;
            self.order.insert(tick, session_id.to_string());
        }
    }

    fn remove(&mut self, session_id: &str) -> Option<Session> {
        let entry = self.entries.remove(session_id)?;
        self.order.remove(&entry.tick);
        Some(entry.session)
    }

    fn pop_oldest(&mut self) -> Option<String> {
        let (_, session_id) = self.order.pop_first()?;
        self.entries.remove(&session_id);
        Some(session_id)
    }

    fn insert(&mut self, session: Session) {
        let tick = self.tick();
        self.order.insert(tick, session.session_id.clone());
        self.entries
            .insert(session.session_id.clone(), Entry { session, tick });
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// In-memory session store with TTL and LRU eviction
pub struct InMemorySessionStore {
    sessions: Mutex<LruMap>,
    ttl: chrono::Duration,
    max_sessions: usize,
    clock: Arc<dyn Clock>,
}

impl InMemorySessionStore {
    /// Create a store
    ///
    /// # Arguments
    /// * `ttl` - Idle time after which a session expires
    /// * `max_sessions` - Capacity before LRU eviction kicks in (minimum 1)
    pub fn new(ttl: Duration, max_sessions: usize) -> Self {
        Self::with_clock(ttl, max_sessions, Arc::new(SystemClock))
    }

    /// Create a store that reads time from `clock`
    pub fn with_clock(ttl: Duration, max_sessions: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Mutex::new(LruMap::default()),
            ttl: chrono::Duration::from_std(ttl)
                .unwrap_or_else(|_| chrono::Duration::days(365 * 100)),
            max_sessions: max_sessions.max(1),
            clock,
        }
    }

    /// Number of sessions currently held, expired ones included
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove every expired session, returning how many were dropped
    pub async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let now = self.clock.now();
        let expired: Vec<String> = sessions
            .entries
            .iter()
            .filter(|(_, entry)| now - entry.session.updated_at > self.ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in &expired {
            sessions.remove(session_id);
        }
        if !expired.is_empty() {
            SESSION_EVICTIONS
                .with_label_values(&["expired"])
                .inc_by(expired.len() as f64);
        }
        SESSIONS_CACHED.set(sessions.len() as f64);
        expired.len()
    }

    /// Start a background task that sweeps expired sessions every `every`
    pub fn spawn_sweeper(store: Arc<InMemorySessionStore>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let removed = store.cleanup_expired().await;
                if removed > 0 {
                    info!(removed, "Swept expired sessions");
                }
            }
        })
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let mut sessions = self.sessions.lock().await;

        let expired = match sessions.entries.get(session_id) {
            None => return Ok(None),
            Some(entry) => self.clock.now() - entry.session.updated_at > self.ttl,
        };

        if expired {
            sessions.remove(session_id);
            SESSION_EVICTIONS.with_label_values(&["expired"]).inc();
            SESSIONS_CACHED.set(sessions.len() as f64);
            debug!(session_id, "Session expired");
            return Ok(None);
        }

        sessions.promote(session_id);
        Ok(sessions.entries.get(session_id).map(|entry| entry.session.clone()))
    }

    async fn save(&self, session: &mut Session) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;
        session.updated_at = self.clock.now();

        sessions.remove(&session.session_id);
        while sessions.len() >= self.max_sessions {
            match sessions.pop_oldest() {
                Some(evicted) => {
                    SESSION_EVICTIONS.with_label_values(&["capacity"]).inc();
                    debug!(session_id = %evicted, "Evicted least recently used session");
                }
                None => break,
            }
        }

        sessions.insert(session.clone());
        SESSIONS_CACHED.set(sessions.len() as f64);
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(session_id);
        SESSIONS_CACHED.set(sessions.len() as f64);
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }
}
