//! End-to-end turn tests: handler + agent + model + tools + session store
//!
//! Models are in-process (scripted or mock); HTTP tools run against wiremock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use agent_runtime::agent::{ReactAgent, ReactAgentConfig};
use agent_runtime::conversation::{ConversationHandler, InboundTurn, OutboundMessage, HANDLER_ERROR};
use agent_runtime::llm::{ChatDelta, ChatModel, ChatRequest, ChatStream, MockChatModel, ModelError, Usage};
use agent_runtime::pack::PromptPack;
use agent_runtime::session::{InMemorySessionStore, Role, SessionStore};
use agent_runtime::tools::{ToolDispatcher, ToolsConfig};

/// One scripted round per call; an `Err` entry fails the stream at that point
struct ScriptedModel {
    rounds: Mutex<Vec<Vec<Result<ChatDelta, String>>>>,
}

impl ScriptedModel {
    fn new(rounds: Vec<Vec<Result<ChatDelta, String>>>) -> Arc<Self> {
        Arc::new(Self { rounds: Mutex::new(rounds.into_iter().rev().collect()) })
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(&self, _request: ChatRequest) -> Result<ChatStream, ModelError> {
        let round = self.rounds.lock().unwrap().pop().unwrap_or_default();
        let deltas: Vec<Result<ChatDelta, ModelError>> = round
            .into_iter()
            .map(|d| d.map_err(|body| ModelError::Status { status: 500, body }))
            .collect();
        Ok(Box::pin(stream::iter(deltas)))
    }
}

fn pack() -> Arc<PromptPack> {
    Arc::new(
        serde_json::from_value(json!({
            "id": "support",
            "prompts": {
                "default": {
                    "system_template": "You help {{customer}}.",
                    "tools": ["get_weather"]
                }
            },
            "tools": {
                "get_weather": {
                    "description": "Current weather for a city",
                    "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
                }
            }
        }))
        .unwrap(),
    )
}

fn store() -> Arc<InMemorySessionStore> {
    Arc::new(InMemorySessionStore::new(Duration::from_secs(3600), 100))
}

fn handler(
    model: Arc<dyn ChatModel>,
    tools: Option<Arc<ToolDispatcher>>,
    store: Arc<InMemorySessionStore>,
) -> ConversationHandler {
    let pack = pack();
    let agent = Arc::new(ReactAgent::new(model, tools.clone(), pack.clone(), ReactAgentConfig::default()));
    ConversationHandler::new(store, agent, tools, pack, "default")
}

#[tokio::test]
async fn test_text_turn_streams_and_persists() {
    let model = ScriptedModel::new(vec![vec![
        Ok(ChatDelta::Text("Hi".into())),
        Ok(ChatDelta::Text(" there".into())),
        Ok(ChatDelta::Usage(Usage::new(5, 3))),
    ]]);
    let store = store();
    let handler = handler(model, None, store.clone());

    let messages: Vec<OutboundMessage> = handler.handle_turn(InboundTurn::text("s1", "hello")).collect().await;

    assert_eq!(
        messages,
        vec![
            OutboundMessage::Chunk { content: "Hi".into() },
            OutboundMessage::Chunk { content: " there".into() },
            OutboundMessage::Done { final_content: "Hi there".into(), usage: Usage::new(5, 3) },
        ]
    );

    let session = store.get("s1").await.unwrap().unwrap();
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.messages[0].role, Role::User);
    assert_eq!(session.messages[0].content.text(), "hello");
    assert_eq!(session.messages[1].role, Role::Assistant);
    assert_eq!(session.messages[1].content.text(), "Hi there");
}

#[tokio::test]
async fn test_mid_stream_failure_ends_with_single_error() {
    let model = ScriptedModel::new(vec![vec![
        Ok(ChatDelta::Text("Hi".into())),
        Err("upstream reset".into()),
    ]]);
    let store = store();
    let handler = handler(model, None, store.clone());

    let messages: Vec<OutboundMessage> = handler.handle_turn(InboundTurn::text("s2", "hello")).collect().await;

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], OutboundMessage::Chunk { content: "Hi".into() });
    match &messages[1] {
        OutboundMessage::Error { code, message } => {
            assert_eq!(code, HANDLER_ERROR);
            assert!(message.contains("upstream reset"));
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(messages.iter().filter(|m| m.is_terminal()).count(), 1);

    let session = store.get("s2").await.unwrap().unwrap();
    assert_eq!(session.messages.len(), 1);
    assert_eq!(session.messages[0].role, Role::User);
}

#[tokio::test]
async fn test_tool_round_trip_with_mock_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/weather"))
        .and(body_json(json!({"city": "Paris"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"temp": 21})))
        .expect(1)
        .mount(&server)
        .await;

    let tools_yaml = format!(
        "handlers:\n  - name: get_weather\n    type: http\n    endpoint: {}/weather\n",
        server.uri()
    );
    let dispatcher = Arc::new(ToolDispatcher::new(ToolsConfig::from_yaml(&tools_yaml).unwrap()));
    dispatcher.initialize().await;
    assert!(dispatcher.has_tool("get_weather"));

    let model = MockChatModel::from_yaml(
        r#"
responses:
  - response:
      tool_calls:
        - id: call_1
          name: get_weather
          args: {city: Paris}
  - response: "Sunny in Paris"
"#,
    )
    .unwrap();

    let store = store();
    let handler = handler(Arc::new(model), Some(dispatcher.clone()), store.clone());
    assert_eq!(handler.resolve_tools().len(), 1);

    let messages: Vec<OutboundMessage> = handler.handle_turn(InboundTurn::text("s3", "weather?")).collect().await;

    assert_eq!(
        messages,
        vec![
            OutboundMessage::ToolCall {
                id: "call_1".into(),
                name: "get_weather".into(),
                arguments_json: r#"{"city":"Paris"}"#.into(),
            },
            OutboundMessage::ToolResult {
                id: "call_1".into(),
                result_json: r#"{"temp":21}"#.into(),
                is_error: false,
            },
            OutboundMessage::Chunk { content: "Sunny ".into() },
            OutboundMessage::Chunk { content: "in ".into() },
            OutboundMessage::Chunk { content: "Paris".into() },
            OutboundMessage::Done { final_content: "Sunny in Paris".into(), usage: Usage::new(20, 40) },
        ]
    );

    // Tool traffic stays out of the stored history
    let session = store.get("s3").await.unwrap().unwrap();
    assert_eq!(session.messages.len(), 2);

    dispatcher.close().await;
}

#[tokio::test]
async fn test_unknown_tool_is_reported_and_turn_continues() {
    let model = ScriptedModel::new(vec![
        vec![Ok(ChatDelta::ToolCalls(vec![agent_runtime::session::ToolCall {
            id: "c1".into(),
            name: "missing".into(),
            arguments: json!({}),
        }]))],
        vec![Ok(ChatDelta::Text("sorry".into()))],
    ]);
    let handler = handler(model, None, store());

    let messages: Vec<OutboundMessage> = handler.handle_turn(InboundTurn::text("s4", "go")).collect().await;

    match &messages[1] {
        OutboundMessage::ToolResult { id, result_json, is_error } => {
            assert_eq!(id, "c1");
            assert!(*is_error);
            let parsed: serde_json::Value = serde_json::from_str(result_json).unwrap();
            assert_eq!(parsed["tool"], "missing");
        }
        other => panic!("expected tool result, got {:?}", other),
    }
    assert_eq!(
        messages.last(),
        Some(&OutboundMessage::Done { final_content: "sorry".into(), usage: Usage::default() })
    );
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let model = Arc::new(MockChatModel::default());
    let store = store();
    let handler = handler(model, None, store.clone());

    let _: Vec<_> = handler.handle_turn(InboundTurn::text("a", "first")).collect().await;
    let _: Vec<_> = handler.handle_turn(InboundTurn::text("b", "second")).collect().await;
    let _: Vec<_> = handler.handle_turn(InboundTurn::text("a", "third")).collect().await;

    assert_eq!(store.get("a").await.unwrap().unwrap().messages.len(), 4);
    assert_eq!(store.get("b").await.unwrap().unwrap().messages.len(), 2);
    let b = store.get("b").await.unwrap().unwrap();
    assert_eq!(b.messages[1].content.text(), "Mock response to: second");
}
