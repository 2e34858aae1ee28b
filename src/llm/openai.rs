//! OpenAI-compatible chat completions client
//!
//! Calls `/chat/completions` without streaming and replays the single
//! response as deltas. Works against any server speaking the same API when
//! `RUNTIME_PROVIDER_BASE_URL` points at it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ChatDelta, ChatModel, ChatRequest, ChatStream, ModelError, Usage};
use crate::session::{Content, ContentPart, Message, Role, ToolCall};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    /// JSON-encoded arguments
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn encode_content(content: &Content) -> Value {
    match content {
        Content::Text(text) => Value::String(text.clone()),
        Content::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({"type": "text", "text": text}),
                    _ => json!({
                        "type": "image_url",
                        "image_url": {"url": part.image_url().unwrap_or_default()},
                    }),
                })
                .collect(),
        ),
    }
}

fn encode_message(message: &Message) -> Value {
    let mut encoded = json!({
        "role": message.role.as_str(),
        "content": encode_content(&message.content),
    });
    if message.role == Role::Tool {
        if let Some(id) = &message.tool_call_id {
            encoded["tool_call_id"] = json!(id);
        }
    }
    if !message.tool_calls.is_empty() {
        encoded["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {"name": call.name, "arguments": call.arguments.to_string()},
                })
            })
            .collect();
    }
    encoded
}

/// Client for `/chat/completions`
#[derive(Clone)]
pub struct OpenAiChatModel {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiChatModel {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages.iter().map(encode_message).collect::<Vec<_>>(),
        });
        if let Some(t) = request.parameters.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = request.parameters.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(n) = request.parameters.max_tokens {
            body["max_tokens"] = json!(n);
        }
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        },
                    })
                })
                .collect();
        }
        body
    }
}

fn into_deltas(response: CompletionResponse) -> Vec<ChatDelta> {
    let mut deltas = Vec::new();
    if let Some(choice) = response.choices.into_iter().next() {
        if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
            deltas.push(ChatDelta::Text(text));
        }
        if !choice.message.tool_calls.is_empty() {
            let calls = choice
                .message
                .tool_calls
                .into_iter()
                .map(|call| ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: serde_json::from_str(&call.function.arguments)
                        .unwrap_or(Value::String(call.function.arguments)),
                })
                .collect();
            deltas.push(ChatDelta::ToolCalls(calls));
        }
    }
    if let Some(usage) = response.usage {
        deltas.push(ChatDelta::Usage(Usage::new(usage.prompt_tokens, usage.completion_tokens)));
    }
    deltas
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, ModelError> {
        let endpoint = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(&request))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ModelError::Status { status: status.as_u16(), body: text });
        }

        let completion: CompletionResponse = serde_json::from_str(&text)?;
        let deltas = into_deltas(completion)
            .into_iter()
            .map(Ok::<ChatDelta, ModelError>);
        Ok(Box::pin(futures_util::stream::iter(deltas)))
    }
}
