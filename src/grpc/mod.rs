//! gRPC front end
//!
//! This module provides:
//! - `RuntimeService` implementation over a [`ConversationHandler`](crate::conversation::ConversationHandler)
//! - Conversions between the wire messages and the conversation types

pub mod server;

pub use server::proto;
pub use server::RuntimeServer;
