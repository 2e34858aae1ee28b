//! Chat model clients used by the reference agent
//!
//! Every backend streams a turn as a sequence of [`ChatDelta`]s: text
//! fragments as they arrive, the tool calls the model wants to make, and the
//! token usage of the call.
//!
//! ```text
//! ChatRequest ──stream_chat──► Text("Hel") Text("lo") ToolCalls([..]) Usage{..}
//! ```

pub mod mock;
pub mod ollama;
pub mod openai;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::Stream;
use thiserror::Error;
use tracing::info;

use crate::config::{Config, ProviderType};
use crate::pack::ModelParameters;
use crate::session::{Message, ToolCall};
use crate::tools::ToolSpec;

pub use mock::MockChatModel;
pub use ollama::OllamaChatModel;
pub use openai::OpenAiChatModel;

/// Token counts reported by a model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self { input_tokens, output_tokens }
    }

    pub fn add(&mut self, other: Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// One model call
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub parameters: ModelParameters,
}

/// Incremental output of a model call
#[derive(Debug, Clone, PartialEq)]
pub enum ChatDelta {
    Text(String),
    ToolCalls(Vec<ToolCall>),
    Usage(Usage),
}

/// Error type for model calls
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to parse model response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read mock config {path}: {message}")]
    MockConfig { path: String, message: String },
    #[error("provider {0} is not supported in this build")]
    Unsupported(ProviderType),
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatDelta, ModelError>> + Send>>;

/// A chat-completions capable model
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier, used in logs and spans
    fn model_name(&self) -> &str;

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, ModelError>;
}

/// Build the configured model backend
pub fn create_chat_model(config: &Config) -> Result<Arc<dyn ChatModel>, ModelError> {
    info!(
        provider = %config.provider_type,
        model = config.provider_model.as_deref().unwrap_or("<default>"),
        "Creating model provider"
    );

    match config.provider_type {
        ProviderType::Mock => {
            let model = match &config.mock_config_path {
                Some(path) => MockChatModel::from_file(path)?,
                None => MockChatModel::default(),
            };
            Ok(Arc::new(model))
        }
        ProviderType::Ollama => Ok(Arc::new(OllamaChatModel::new(
            config
                .provider_base_url
                .clone()
                .unwrap_or_else(|| ollama::DEFAULT_BASE_URL.to_string()),
            config
                .provider_model
                .clone()
                .unwrap_or_else(|| ollama::DEFAULT_MODEL.to_string()),
        ))),
        ProviderType::OpenAi => Ok(Arc::new(OpenAiChatModel::new(
            config
                .provider_base_url
                .clone()
                .unwrap_or_else(|| openai::DEFAULT_BASE_URL.to_string()),
            config
                .provider_model
                .clone()
                .unwrap_or_else(|| openai::DEFAULT_MODEL.to_string()),
            config.api_keys.openai.clone().unwrap_or_default(),
        ))),
        ProviderType::Claude | ProviderType::Gemini => {
            Err(ModelError::Unsupported(config.provider_type))
        }
    }
}

/// Text the model should answer: the last message's text, or for parts the
/// first text part
pub(crate) fn last_message_text(messages: &[Message]) -> String {
    use crate::session::{Content, ContentPart};

    match messages.last().map(|m| &m.content) {
        Some(Content::Text(text)) => text.clone(),
        Some(Content::Parts(parts)) => parts
            .iter()
            .find_map(|part| match part {
                ContentPart::Text { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default(),
        None => String::new(),
    }
}
