//! Conversation orchestration
//!
//! One inbound turn becomes one ordered stream of outbound messages that
//! always ends in exactly one terminal `Done` or `Error`.
//!
//! ```text
//! InboundTurn
//!     │
//!     ▼
//! load-or-create session ──► append user message
//!     │
//!     ▼
//! AgentInvoker::invoke ──► ReasoningEvent stream
//!     │                         │
//!     │                  TurnTranslator::apply
//!     │                         │
//!     │              Chunk / ToolCall / ToolResult  ──► caller
//!     ▼
//! append assistant text (if any) ──► save ──► Done   ──► caller
//!
//! any failure: save user message only ──► Error(HANDLER_ERROR)
//! ```

pub mod handler;
pub mod translator;

use std::collections::HashMap;

use crate::llm::Usage;
use crate::session::Content;

pub use handler::ConversationHandler;
pub use translator::{TurnPhase, TurnTranslator};

/// Error code for failures inside a turn
pub const HANDLER_ERROR: &str = "HANDLER_ERROR";
/// Error code for failures of the stream outside any turn
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// One user message addressed to a session
#[derive(Debug, Clone, Default)]
pub struct InboundTurn {
    pub session_id: String,
    pub content: Content,
    pub metadata: HashMap<String, String>,
    /// Correlation id; a fresh one is generated when absent
    pub trace_id: Option<String>,
}

impl InboundTurn {
    pub fn text(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            content: Content::Text(content.into()),
            ..Self::default()
        }
    }
}

/// Message sent back to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Chunk {
        content: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments_json: String,
    },
    ToolResult {
        id: String,
        result_json: String,
        is_error: bool,
    },
    Done {
        final_content: String,
        usage: Usage,
    },
    Error {
        code: String,
        message: String,
    },
}

impl OutboundMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        OutboundMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// `Done` and `Error` end a turn
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboundMessage::Done { .. } | OutboundMessage::Error { .. })
    }
}
