//! Agent invocation: turning a conversation into reasoning events
//!
//! The conversation handler only depends on [`AgentInvoker`]: given the
//! history, the tools on offer and the template variables it yields an
//! ordered, lazy stream of [`ReasoningEvent`]s. [`ReactAgent`] is the
//! implementation shipped with the runtime.
//!
//! # Architecture
//!
//! ```text
//! messages + tools ──► ReactAgent ──► ChatModel (ollama / openai / mock)
//!                          │                │
//!                          │        text ───┴──► TextDelta
//!                          │        tool calls
//!                          ▼
//!                    ToolDispatcher ──► ToolStarted / ToolFinished
//!                          │
//!                   feed results back ──► loop (≤ max_rounds) ──► TurnCompleted
//! ```

pub mod controller;

use std::collections::HashMap;
use std::pin::Pin;

use futures_util::stream::Stream;
use thiserror::Error;

use crate::llm::{ModelError, Usage};
use crate::pack::PackError;
use crate::session::Message;
use crate::tools::ToolSpec;

pub use controller::{ReactAgent, ReactAgentConfig};

/// One unit of agent progress, consumed in emission order
#[derive(Debug, Clone, PartialEq)]
pub enum ReasoningEvent {
    /// Partial assistant text
    TextDelta(String),
    ToolStarted {
        run_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolFinished {
        run_id: String,
        result: String,
        is_error: bool,
    },
    /// Closes the stream; usage is summed over every model call of the turn
    TurnCompleted { usage: Option<Usage> },
}

/// Error type for agent runs
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Pack(#[from] PackError),
    #[error("agent still requesting tools after {0} rounds")]
    MaxRoundsExceeded(usize),
    #[error("{0}")]
    Other(String),
}

/// Input of one agent run
#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub variables: HashMap<String, serde_json::Value>,
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<ReasoningEvent, AgentError>> + Send>>;

/// A reasoning engine that can run one turn
pub trait AgentInvoker: Send + Sync {
    /// Start a run; no work happens until the stream is polled
    fn invoke(&self, request: AgentRequest) -> EventStream;

    /// Whether the agent definition is loaded and usable
    fn is_ready(&self) -> bool {
        true
    }
}
