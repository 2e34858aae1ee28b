//! ReAct agent - model calls interleaved with tool execution
//!
//! Each round calls the model with the conversation so far. Text is streamed
//! out as it arrives. If the model asks for tools they are dispatched one by
//! one, their results appended as tool messages, and the next round begins.
//! A round without tool calls ends the run.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{AgentError, AgentInvoker, AgentRequest, EventStream, ReasoningEvent};
use crate::config::DEFAULT_MAX_TOOL_ROUNDS;
use crate::llm::{ChatDelta, ChatModel, ChatRequest, Usage};
use crate::metrics::LLM_CALL_DURATION;
use crate::pack::PromptPack;
use crate::session::{Message, Role, ToolCall};
use crate::tools::{ToolDispatcher, ToolError};

/// Settings for the agent
#[derive(Debug, Clone)]
pub struct ReactAgentConfig {
    /// Prompt of the pack this agent serves
    pub prompt_name: String,
    /// Tool rounds allowed when the prompt has no tool policy
    pub max_rounds: usize,
}

impl Default for ReactAgentConfig {
    fn default() -> Self {
        Self {
            prompt_name: "default".to_string(),
            max_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

/// Agent driving a [`ChatModel`] and a [`ToolDispatcher`]
pub struct ReactAgent {
    model: Arc<dyn ChatModel>,
    tools: Option<Arc<ToolDispatcher>>,
    pack: Arc<PromptPack>,
    config: ReactAgentConfig,
}

impl ReactAgent {
    /// # Arguments
    /// * `model` - chat model used for every round
    /// * `tools` - dispatcher for tool calls; `None` when no tools are configured
    /// * `pack` - prompt pack holding the system template and tool policy
    /// * `config` - prompt selection and round limit
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: Option<Arc<ToolDispatcher>>,
        pack: Arc<PromptPack>,
        config: ReactAgentConfig,
    ) -> Self {
        info!(
            prompt = %config.prompt_name,
            model = %model.model_name(),
            tools = tools.as_ref().map(|t| t.tool_names().len()).unwrap_or(0),
            "Created agent"
        );
        Self { model, tools, pack, config }
    }

    fn max_rounds(&self) -> usize {
        self.pack
            .max_rounds(&self.config.prompt_name)
            .unwrap_or(self.config.max_rounds)
    }
}

async fn dispatch(
    tools: Option<&ToolDispatcher>,
    call: &ToolCall,
) -> (String, bool) {
    let result = match tools {
        Some(dispatcher) => dispatcher.execute(&call.name, &call.arguments).await,
        None => Err(ToolError::UnknownTool { tool: call.name.clone() }),
    };
    match result {
        Ok(output) => (output.to_text(), false),
        Err(e) => (e.to_json().to_string(), true),
    }
}

impl AgentInvoker for ReactAgent {
    fn invoke(&self, request: AgentRequest) -> EventStream {
        let model = self.model.clone();
        let tools = self.tools.clone();
        let pack = self.pack.clone();
        let prompt_name = self.config.prompt_name.clone();
        let max_rounds = self.max_rounds();

        let events = async_stream::try_stream! {
            let system_prompt = pack
                .render_system_prompt(&prompt_name, &request.variables)
                .map_err(AgentError::from)?;
            let parameters = pack.parameters(&prompt_name);

            let mut conversation = Vec::with_capacity(request.messages.len() + 1);
            let has_system = request.messages.first().is_some_and(|m| m.role == Role::System);
            if !has_system && !system_prompt.is_empty() {
                conversation.push(Message::system(system_prompt));
            }
            conversation.extend(request.messages);

            let mut usage = Usage::default();
            let mut saw_usage = false;
            let mut tool_rounds = 0;

            loop {
                let llm_span = info_span!(
                    "llm_call",
                    model = %model.model_name(),
                    round = tool_rounds + 1,
                    otel.name = "llm_call"
                );
                let call_start = Instant::now();

                let chat_request = ChatRequest {
                    messages: conversation.clone(),
                    tools: request.tools.clone(),
                    parameters: parameters.clone(),
                };
                let mut deltas = model
                    .stream_chat(chat_request)
                    .instrument(llm_span)
                    .await
                    .map_err(AgentError::from)?;

                let mut text = String::new();
                let mut calls: Vec<ToolCall> = Vec::new();
                while let Some(delta) = deltas.next().await {
                    match delta.map_err(AgentError::from)? {
                        ChatDelta::Text(fragment) => {
                            text.push_str(&fragment);
                            yield ReasoningEvent::TextDelta(fragment);
                        }
                        ChatDelta::ToolCalls(requested) => calls.extend(requested),
                        ChatDelta::Usage(reported) => {
                            usage.add(reported);
                            saw_usage = true;
                        }
                    }
                }

                let elapsed = call_start.elapsed().as_secs_f64();
                LLM_CALL_DURATION
                    .with_label_values(&[model.model_name()])
                    .observe(elapsed);
                debug!(round = tool_rounds + 1, duration_ms = elapsed * 1000.0, tool_calls = calls.len(), "LLM call completed");

                if calls.is_empty() {
                    break;
                }
                if tool_rounds >= max_rounds {
                    warn!(max_rounds, "Tool round limit reached");
                    Err::<(), _>(AgentError::MaxRoundsExceeded(max_rounds))?;
                }
                tool_rounds += 1;

                conversation.push(Message::assistant_with_tools(text, calls.clone()));

                for call in calls {
                    yield ReasoningEvent::ToolStarted {
                        run_id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    };

                    let tool_span = info_span!(
                        "tool_call",
                        tool = %call.name,
                        run_id = %call.id,
                        otel.name = "tool_call"
                    );
                    let (result, is_error) = dispatch(tools.as_deref(), &call)
                        .instrument(tool_span)
                        .await;

                    conversation.push(Message::tool(call.id.clone(), result.clone()));
                    yield ReasoningEvent::ToolFinished {
                        run_id: call.id,
                        result,
                        is_error,
                    };
                }
            }

            yield ReasoningEvent::TurnCompleted {
                usage: saw_usage.then_some(usage),
            };
        };

        Box::pin(events)
    }

    fn is_ready(&self) -> bool {
        self.pack.is_ready(&self.config.prompt_name)
    }
}
