//! Scripted model for tests and local runs
//!
//! Responses come from a YAML file:
//!
//! ```yaml
//! responses:
//!   - match: weather          # case-insensitive substring of the last message
//!     response:
//!       content: Let me check.
//!       tool_calls:
//!         - name: get_weather
//!           args: { city: Paris }
//!   - response: Hello from the mock
//! ```
//!
//! A matching rule wins; otherwise responses are cycled in order. With no
//! responses at all the model echoes the input.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use super::{last_message_text, ChatDelta, ChatModel, ChatRequest, ChatStream, ModelError, Usage};
use crate::session::ToolCall;

const DEFAULT_RESPONSE: &str = "This is a mock response.";

/// Usage reported for every mock call
pub const MOCK_USAGE: Usage = Usage { input_tokens: 10, output_tokens: 20 };

#[derive(Debug, Clone, Deserialize)]
pub struct MockToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, alias = "arguments")]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MockReply {
    Text(String),
    WithTools {
        #[serde(default)]
        content: String,
        #[serde(default)]
        tool_calls: Vec<MockToolCall>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct MockResponse {
    #[serde(default, rename = "match")]
    pub pattern: Option<String>,
    #[serde(default)]
    pub response: Option<MockReply>,
}

#[derive(Debug, Default, Deserialize)]
struct MockFile {
    #[serde(default)]
    responses: Vec<MockResponse>,
}

#[derive(Debug, Default)]
pub struct MockChatModel {
    responses: Vec<MockResponse>,
    next: AtomicUsize,
}

impl MockChatModel {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            next: AtomicUsize::new(0),
        }
    }

    /// Load responses from YAML; a missing file yields the echo model
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Mock config not found, echoing input");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ModelError::MockConfig {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            }
        };
        Self::from_yaml(&text).map_err(|e| ModelError::MockConfig {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: MockFile = serde_yaml::from_str(text)?;
        Ok(Self::new(file.responses))
    }

    fn reply_for(&self, input: &str) -> MockReply {
        let lowered = input.to_lowercase();
        let default = || MockReply::Text(DEFAULT_RESPONSE.to_string());

        if let Some(rule) = self.responses.iter().find(|r| {
            r.pattern
                .as_deref()
                .is_some_and(|p| !p.is_empty() && lowered.contains(&p.to_lowercase()))
        }) {
            return rule.response.clone().unwrap_or_else(default);
        }

        if !self.responses.is_empty() {
            let index = self.next.fetch_add(1, Ordering::Relaxed) % self.responses.len();
            return self.responses[index].response.clone().unwrap_or_else(default);
        }

        let echoed: String = input.chars().take(100).collect();
        MockReply::Text(format!("Mock response to: {}", echoed))
    }
}

/// Split text into word-sized fragments, whitespace kept with the word before it
fn fragments(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

#[async_trait]
impl ChatModel for MockChatModel {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, ModelError> {
        let input = last_message_text(&request.messages);

        let (content, calls) = match self.reply_for(&input) {
            MockReply::Text(text) => (text, Vec::new()),
            MockReply::WithTools { content, tool_calls } => (content, tool_calls),
        };

        let mut deltas: Vec<ChatDelta> = fragments(&content).into_iter().map(ChatDelta::Text).collect();
        if !calls.is_empty() {
            deltas.push(ChatDelta::ToolCalls(
                calls
                    .into_iter()
                    .map(|call| ToolCall {
                        id: call.id.unwrap_or_else(|| format!("call_{}", Uuid::now_v7().simple())),
                        name: call.name,
                        arguments: if call.args.is_null() { serde_json::json!({}) } else { call.args },
                    })
                    .collect(),
            ));
        }
        deltas.push(ChatDelta::Usage(MOCK_USAGE));

        Ok(Box::pin(futures_util::stream::iter(
            deltas.into_iter().map(Ok::<ChatDelta, ModelError>),
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use futures_util::StreamExt;

    use super::*;
    use crate::session::Message;

    async fn run(model: &MockChatModel, input: &str) -> Vec<ChatDelta> {
        let request = ChatRequest {
            messages: vec![Message::user(input)],
            ..ChatRequest::default()
        };
        model
            .stream_chat(request)
            .await
            .unwrap()
            .map(|d| d.unwrap())
            .collect()
            .await
    }

    fn text_of(deltas: &[ChatDelta]) -> String {
        deltas
            .iter()
            .filter_map(|d| match d {
                ChatDelta::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_echo_without_responses() {
        let model = MockChatModel::default();
        let deltas = run(&model, "hello").await;
        assert_eq!(text_of(&deltas), "Mock response to: hello");
        assert_eq!(deltas.last(), Some(&ChatDelta::Usage(MOCK_USAGE)));
    }

    #[tokio::test]
    async fn test_streams_word_fragments() {
        let model = MockChatModel::from_yaml("responses:\n  - response: Hi there friend\n").unwrap();
        let deltas = run(&model, "x").await;
        assert_eq!(
            &deltas[..3],
            &[
                ChatDelta::Text("Hi ".into()),
                ChatDelta::Text("there ".into()),
                ChatDelta::Text("friend".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_match_rules_are_case_insensitive() {
        let yaml = r#"
responses:
  - match: weather
    response: It is sunny
  - response: Fallback
"#;
        let model = MockChatModel::from_yaml(yaml).unwrap();
        assert_eq!(text_of(&run(&model, "What's the WEATHER like?").await), "It is sunny");
    }

    #[tokio::test]
    async fn test_sequential_responses_cycle() {
        let yaml = "responses:\n  - response: one\n  - response: two\n";
        let model = MockChatModel::from_yaml(yaml).unwrap();
        assert_eq!(text_of(&run(&model, "a").await), "one");
        assert_eq!(text_of(&run(&model, "b").await), "two");
        assert_eq!(text_of(&run(&model, "c").await), "one");
    }

    #[tokio::test]
    async fn test_tool_call_responses() {
        let yaml = r#"
responses:
  - match: weather
    response:
      content: Checking.
      tool_calls:
        - id: call_1
          name: get_weather
          args:
            city: Paris
"#;
        let model = MockChatModel::from_yaml(yaml).unwrap();
        let deltas = run(&model, "weather please").await;
        assert_eq!(text_of(&deltas), "Checking.");
        assert!(deltas.contains(&ChatDelta::ToolCalls(vec![ToolCall {
            id: "call_1".into(),
            name: "get_weather".into(),
            arguments: serde_json::json!({"city": "Paris"}),
        }])));
    }

    #[test]
    fn test_missing_file_echoes() {
        let dir = tempfile::tempdir().unwrap();
        let model = MockChatModel::from_file(dir.path().join("absent.yaml")).unwrap();
        assert!(model.responses.is_empty());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "responses: [unclosed").unwrap();
        assert!(matches!(
            MockChatModel::from_file(file.path()),
            Err(ModelError::MockConfig { .. })
        ));
    }
}
