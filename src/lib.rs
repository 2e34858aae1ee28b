//! Agent Runtime - conversational agent served over gRPC
//!
//! Each turn a client sends on the `Converse` stream is loaded into a
//! session, run through a reasoning agent (model calls plus tool dispatch)
//! and answered with an ordered stream of chunks, tool activity and exactly
//! one terminal `Done` or `Error`.
//!
//! # Modules
//!
//! - `config` - environment-driven configuration
//! - `session` - session model and stores (in-memory LRU, Redis)
//! - `pack` - prompt pack: system templates, parameters, tool policy
//! - `llm` - chat model providers (Ollama, OpenAI, mock)
//! - `tools` - tool handler config, HTTP adapter, dispatcher with retries
//! - `agent` - reasoning loop producing `ReasoningEvent`s
//! - `conversation` - turn handling and event translation
//! - `grpc` - `RuntimeService` front end
//! - `health` - liveness/readiness and Prometheus endpoints
//! - `metrics` - Prometheus metrics
//! - `tracing` - logging and OTLP export
//!
//! # Quick Start
//!
//! ```ignore
//! use agent_runtime::conversation::{ConversationHandler, InboundTurn};
//!
//! let handler = ConversationHandler::new(store, agent, None, pack, "default");
//! let turn = handler.handle_turn(InboundTurn::text("session-1", "hello"));
//! ```

pub mod agent;
pub mod config;
pub mod conversation;
pub mod grpc;
pub mod health;
pub mod llm;
pub mod metrics;
pub mod pack;
pub mod session;
pub mod tools;
pub mod tracing;

pub use config::Config;
pub use conversation::{ConversationHandler, InboundTurn, OutboundMessage};
