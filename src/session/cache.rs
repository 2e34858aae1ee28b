//! Session store backed by an external key-value cache
//!
//! Each session is encoded as a self-describing JSON record and written under
//! `<prefix><session_id>` with a server-side expiry equal to the TTL, so the
//! cache does the expiring for us.
//!
//! A record that fails to decode is logged and reported as "not found". The
//! caller then starts a fresh history instead of failing every turn on the
//! same corrupt entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Clock, Message, Session, SessionError, SessionStore, SystemClock};

/// Key prefix for session records
pub const DEFAULT_KEY_PREFIX: &str = "agent-runtime:session:";

/// Minimal key-value capability the cache store needs
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SessionError>;

    /// Write `value` and let the cache drop it after `ttl`
    async fn set_with_expiry(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), SessionError>;

    async fn delete(&self, key: &str) -> Result<(), SessionError>;

    async fn close(&self) -> Result<(), SessionError>;
}

/// Redis client that connects on first use
pub struct RedisCache {
    client: redis::Client,
    connection: Mutex<Option<ConnectionManager>>,
}

impl RedisCache {
    /// Parse the connection URL (e.g. `redis://localhost:6379`) without connecting
    pub fn open(url: &str) -> Result<Self, SessionError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            connection: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, SessionError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = ConnectionManager::new(self.client.clone()).await?;
        debug!("Connected to session cache");
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        let mut conn = self.connection().await?;
        // SETEX rejects a zero expiry
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.connection.lock().await.take();
        Ok(())
    }
}

/// Wire form of a session
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Encode a session as a cache record
pub fn encode_session(session: &Session) -> Result<String, SessionError> {
    let record = SessionRecord {
        messages: session.messages.clone(),
        metadata: session.metadata.clone(),
        created_at: session.created_at,
        updated_at: session.updated_at,
    };
    serde_json::to_string(&record).map_err(|source| SessionError::Encode {
        session_id: session.session_id.clone(),
        source,
    })
}

/// Decode a cache record stored under `session_id`
pub fn decode_session(session_id: &str, data: &str) -> Result<Session, serde_json::Error> {
    let record: SessionRecord = serde_json::from_str(data)?;
    Ok(Session {
        session_id: session_id.to_string(),
        messages: record.messages,
        metadata: record.metadata,
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
}

/// Session store over any [`KeyValueCache`]
pub struct CacheSessionStore<C> {
    cache: C,
    ttl: Duration,
    key_prefix: String,
    clock: Arc<dyn Clock>,
}

impl CacheSessionStore<RedisCache> {
    /// Store backed by Redis at `url`
    pub fn redis(url: &str, ttl: Duration) -> Result<Self, SessionError> {
        Ok(Self::new(RedisCache::open(url)?, ttl))
    }
}

impl<C: KeyValueCache> CacheSessionStore<C> {
    pub fn new(cache: C, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The underlying cache
    pub fn cache(&self) -> &C {
        &self.cache
    }

    fn key(&self, session_id: &str) -> String {
        format!("{}{}", self.key_prefix, session_id)
    }
}

#[async_trait]
impl<C: KeyValueCache> SessionStore for CacheSessionStore<C> {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let Some(data) = self.cache.get(&self.key(session_id)).await? else {
            return Ok(None);
        };

        match decode_session(session_id, &data) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(session_id, error = %e, "Failed to decode session record, starting fresh");
                Ok(None)
            }
        }
    }

    async fn save(&self, session: &mut Session) -> Result<(), SessionError> {
        session.updated_at = self.clock.now();
        let data = encode_session(session)?;
        self.cache
            .set_with_expiry(&self.key(&session.session_id), data, self.ttl)
            .await
    }

    async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        self.cache.delete(&self.key(session_id)).await
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.cache.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::session::{Content, ContentPart, ToolCall};

    /// In-process stand-in for the external cache
    #[derive(Default)]
    struct FakeCache {
        entries: StdMutex<HashMap<String, (String, Duration)>>,
    }

    impl FakeCache {
        fn insert_raw(&self, key: &str, value: &str) {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), (value.to_string(), Duration::from_secs(1)));
        }

        fn ttl_of(&self, key: &str) -> Option<Duration> {
            self.entries.lock().unwrap().get(key).map(|(_, ttl)| *ttl)
        }
    }

    #[async_trait]
    impl KeyValueCache for FakeCache {
        async fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
            Ok(self.entries.lock().unwrap().get(key).map(|(v, _)| v.clone()))
        }

        async fn set_with_expiry(
            &self,
            key: &str,
            value: String,
            ttl: Duration,
        ) -> Result<(), SessionError> {
            self.entries.lock().unwrap().insert(key.to_string(), (value, ttl));
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), SessionError> {
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }

        async fn close(&self) -> Result<(), SessionError> {
            Ok(())
        }
    }

    fn rich_session() -> Session {
        let mut session = Session::new("rich");
        session.add_message(Message::system("be brief"));
        session.add_message(Message::user(Content::Parts(vec![
            ContentPart::Text { text: "what is this?".into() },
            ContentPart::ImageUrl { url: "https://example.com/a.png".into() },
            ContentPart::ImageData { data: "aGk=".into(), mime_type: "image/jpeg".into() },
        ])));
        session.add_message(Message::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "call-1".into(),
                name: "lookup".into(),
                arguments: serde_json::json!({"q": "cat"}),
            }],
        ));
        session.add_message(Message::tool("call-1", r#"{"answer":"cat"}"#));
        session.add_message(Message::assistant("A cat."));
        session
            .metadata
            .insert("channel".into(), serde_json::json!("web"));
        session
    }

    #[tokio::test]
    async fn test_round_trip_preserves_session() {
        let store = CacheSessionStore::new(FakeCache::default(), Duration::from_secs(3600));
        let mut session = rich_session();
        store.save(&mut session).await.unwrap();

        let loaded = store.get("rich").await.unwrap().expect("stored");
        assert_eq!(loaded.messages, session.messages);
        assert_eq!(loaded.metadata, session.metadata);
        assert_eq!(loaded.created_at.timestamp(), session.created_at.timestamp());
        assert_eq!(loaded.updated_at.timestamp(), session.updated_at.timestamp());
    }

    #[tokio::test]
    async fn test_save_uses_prefixed_key_and_ttl() {
        let store = CacheSessionStore::new(FakeCache::default(), Duration::from_secs(90))
            .with_key_prefix("test:");
        store.save(&mut Session::new("abc")).await.unwrap();

        assert_eq!(store.cache().ttl_of("test:abc"), Some(Duration::from_secs(90)));
        assert_eq!(store.cache().ttl_of("abc"), None);
    }

    #[tokio::test]
    async fn test_corrupt_record_reads_as_absent() {
        let store = CacheSessionStore::new(FakeCache::default(), Duration::from_secs(60));
        store
            .cache()
            .insert_raw(&format!("{}broken", DEFAULT_KEY_PREFIX), "{not json");

        assert!(store.get("broken").await.unwrap().is_none());

        let fresh = store.get_or_create("broken").await.unwrap();
        assert!(fresh.messages.is_empty());
        assert!(store.get("broken").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_missing_is_noop() {
        let store = CacheSessionStore::new(FakeCache::default(), Duration::from_secs(60));
        store.delete("nothing").await.unwrap();

        store.save(&mut Session::new("x")).await.unwrap();
        store.delete("x").await.unwrap();
        assert!(store.get("x").await.unwrap().is_none());
    }

    #[test]
    fn test_record_is_self_describing() {
        let mut session = Session::new("s");
        session.add_message(Message::user("hello"));
        let encoded = encode_session(&session).unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();

        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "hello");
        assert!(value["created_at"].is_string());
        assert!(value["updated_at"].is_string());
    }
}
