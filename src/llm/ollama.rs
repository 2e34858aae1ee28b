//! Ollama `/api/chat` client with tool calling
//!
//! The endpoint streams newline-delimited JSON objects. Content fragments
//! arrive in `message.content`, tool calls in `message.tool_calls`, and the
//! final object (`done: true`) carries the token counts.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{ChatDelta, ChatModel, ChatRequest, ChatStream, ModelError, Usage};
use crate::session::{Content, ContentPart, Message, ToolCall};
use crate::tools::ToolSpec;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";

/// A message in Ollama's chat format
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
    /// Base64 images
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaToolCall {
    function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Tool definition for the model
#[derive(Debug, Clone, Serialize)]
struct Tool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ToolFunction<'a>,
}

#[derive(Debug, Clone, Serialize)]
struct ToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

/// One line of the streamed response
#[derive(Debug, Deserialize)]
struct ChatResponseLine {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
    #[serde(default)]
    error: Option<String>,
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        let (content, images) = match &message.content {
            Content::Text(text) => (text.clone(), Vec::new()),
            Content::Parts(parts) => {
                let mut images = Vec::new();
                for part in parts {
                    match part {
                        ContentPart::ImageData { data, .. } => images.push(data.clone()),
                        // Ollama only accepts inline images
                        ContentPart::ImageUrl { url } => debug!(%url, "Dropping image URL for Ollama"),
                        ContentPart::Text { .. } => {}
                    }
                }
                (message.content.text(), images)
            }
        };

        Self {
            role: message.role.as_str().to_string(),
            content,
            images,
            tool_calls: message
                .tool_calls
                .iter()
                .map(|call| OllamaToolCall {
                    function: FunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect(),
        }
    }
}

fn tool_definitions(tools: &[ToolSpec]) -> Vec<Tool<'_>> {
    tools
        .iter()
        .map(|tool| Tool {
            tool_type: "function",
            function: ToolFunction {
                name: &tool.name,
                description: &tool.description,
                parameters: &tool.parameters,
            },
        })
        .collect()
}

/// Client for Ollama's chat endpoint
#[derive(Clone)]
pub struct OllamaChatModel {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaChatModel {
    /// # Arguments
    /// * `base_url` - Ollama server (e.g. "http://localhost:11434")
    /// * `model` - model name (e.g. "llama3.2")
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let messages: Vec<ChatMessage> = request.messages.iter().map(ChatMessage::from).collect();

        let mut options = serde_json::Map::new();
        if let Some(t) = request.parameters.temperature {
            options.insert("temperature".into(), t.into());
        }
        if let Some(p) = request.parameters.top_p {
            options.insert("top_p".into(), p.into());
        }
        if let Some(n) = request.parameters.max_tokens {
            options.insert("num_predict".into(), n.into());
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        if !options.is_empty() {
            body["options"] = serde_json::Value::Object(options);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(tool_definitions(&request.tools));
        }
        body
    }
}

/// Translate one NDJSON line into deltas
fn parse_line(line: &[u8]) -> Result<Vec<ChatDelta>, ModelError> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let data: ChatResponseLine = serde_json::from_str(trimmed)?;
    if let Some(error) = data.error {
        return Err(ModelError::Status { status: 200, body: error });
    }

    let mut deltas = Vec::new();
    if let Some(message) = data.message {
        if !message.content.is_empty() {
            deltas.push(ChatDelta::Text(message.content));
        }
        if !message.tool_calls.is_empty() {
            let calls = message
                .tool_calls
                .into_iter()
                .map(|call| ToolCall {
                    // Ollama does not assign call ids
                    id: format!("call_{}", Uuid::now_v7().simple()),
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect();
            deltas.push(ChatDelta::ToolCalls(calls));
        }
    }
    if data.done {
        deltas.push(ChatDelta::Usage(Usage::new(data.prompt_eval_count, data.eval_count)));
    }
    Ok(deltas)
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, ModelError> {
        let endpoint = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(&self.request_body(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status { status: status.as_u16(), body });
        }

        let mut bytes_stream = response.bytes_stream();

        // Chunks do not align with lines; buffer until each newline
        let deltas = async_stream::try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes_stream.next().await {
                let chunk = chunk.map_err(ModelError::from)?;
                buffer.extend_from_slice(&chunk);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    for delta in parse_line(&line)? {
                        yield delta;
                    }
                }
            }
            for delta in parse_line(&buffer)? {
                yield delta;
            }
        };

        Ok(Box::pin(deltas))
    }
}
