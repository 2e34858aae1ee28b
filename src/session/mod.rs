//! Conversation sessions and the stores that keep them
//!
//! A session is the multi-turn history of one conversation, keyed by a
//! caller-chosen id. Two interchangeable backends implement [`SessionStore`]:
//!
//! - [`InMemorySessionStore`] - bounded LRU map with lazy TTL expiry
//! - [`CacheSessionStore`] - records in an external key-value cache (Redis)
//!
//! # Lifecycle
//!
//! ```text
//! unknown id ──get_or_create──► Session (0 messages) ──save──► store
//!                                    │
//!                     add_message(user) ... add_message(assistant)
//!                                    │
//!                                  save ──► updated_at refreshed
//!
//! expiry: now - updated_at > ttl  (checked on read)
//! eviction: least recently used entry when the store is full
//! ```

pub mod cache;
pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cache::{CacheSessionStore, KeyValueCache, RedisCache};
pub use memory::InMemorySessionStore;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One typed part of a multimodal message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { url: String },
    /// Inline image bytes, base64 encoded
    ImageData { data: String, mime_type: String },
}

impl ContentPart {
    /// Inline images as a `data:` URL, the form most chat APIs accept
    pub fn image_url(&self) -> Option<String> {
        match self {
            ContentPart::Text { .. } => None,
            ContentPart::ImageUrl { url } => Some(url.clone()),
            ContentPart::ImageData { data, mime_type } => {
                Some(format!("data:{};base64,{}", mime_type, data))
            }
        }
    }
}

/// Message content: plain text or a sequence of typed parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Concatenated text of the content, images skipped
    pub fn text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(text) => text.is_empty(),
            Content::Parts(parts) => parts.is_empty(),
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Content::Text(String::new())
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
    /// Links a tool result to the call that produced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    fn new(role: Role, content: Content) -> Self {
        Self {
            role,
            content,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<Content>) -> Self {
        Self::new(Role::System, content.into())
    }

    pub fn user(content: impl Into<Content>) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    /// Assistant message that requests tool calls
    pub fn assistant_with_tools(content: impl Into<Content>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content.into())
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<Content>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content.into())
        }
    }
}

/// A conversation session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::created_at(session_id, Utc::now())
    }

    /// Create a session stamped with an explicit creation time
    pub fn created_at(session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn add_messages(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
        self.updated_at = Utc::now();
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
        self.updated_at = Utc::now();
    }
}

/// Source of the current time for expiry decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Error type for session store operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("failed to encode session {session_id}: {source}")]
    Encode {
        session_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("session store is closed")]
    Closed,
}

/// Storage contract shared by every session backend
///
/// `get_or_create` is two calls composed, not an atomic operation: two
/// concurrent first turns for the same new id can each create a session and
/// the later `save` wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session, `None` if absent or expired
    async fn get(&self, session_id: &str) -> Result<Option<Session>, SessionError>;

    /// Persist a session, refreshing its `updated_at`
    async fn save(&self, session: &mut Session) -> Result<(), SessionError>;

    /// Remove a session; unknown ids are a no-op
    async fn delete(&self, session_id: &str) -> Result<(), SessionError>;

    /// Release backend resources
    async fn close(&self) -> Result<(), SessionError>;

    async fn get_or_create(&self, session_id: &str) -> Result<Session, SessionError> {
        if let Some(session) = self.get(session_id).await? {
            return Ok(session);
        }
        let mut session = Session::new(session_id);
        self.save(&mut session).await?;
        Ok(session)
    }
}
