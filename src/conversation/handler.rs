//! Turn execution against the session store and the agent

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{Stream, StreamExt};
use tracing::{error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use super::{InboundTurn, OutboundMessage, TurnTranslator, HANDLER_ERROR};
use crate::agent::{AgentInvoker, AgentRequest};
use crate::metrics::{TOKENS_TOTAL, TURNS_TOTAL, TURN_DURATION};
use crate::pack::PromptPack;
use crate::session::{Message, SessionStore};
use crate::tools::{ToolDispatcher, ToolSpec};

/// Metadata key carrying prompt variables as a JSON object string
pub const VARIABLES_KEY: &str = "variables";

/// Records the turn outcome; a turn dropped before finishing counts as cancelled
struct TurnOutcome {
    started: Instant,
    outcome: Option<&'static str>,
}

impl TurnOutcome {
    fn start() -> Self {
        Self { started: Instant::now(), outcome: None }
    }

    fn finish(&mut self, outcome: &'static str) {
        self.outcome = Some(outcome);
    }
}

impl Drop for TurnOutcome {
    fn drop(&mut self) {
        let outcome = self.outcome.unwrap_or("cancelled");
        TURNS_TOTAL.with_label_values(&[outcome]).inc();
        TURN_DURATION.observe(self.started.elapsed().as_secs_f64());
    }
}

/// Runs conversation turns
///
/// Shared by every connection; turns for different sessions run
/// concurrently.
pub struct ConversationHandler {
    store: Arc<dyn SessionStore>,
    agent: Arc<dyn AgentInvoker>,
    tools: Option<Arc<ToolDispatcher>>,
    pack: Arc<PromptPack>,
    prompt_name: String,
}

impl ConversationHandler {
    pub fn new(
        store: Arc<dyn SessionStore>,
        agent: Arc<dyn AgentInvoker>,
        tools: Option<Arc<ToolDispatcher>>,
        pack: Arc<PromptPack>,
        prompt_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            agent,
            tools,
            pack,
            prompt_name: prompt_name.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Pack loaded, prompt resolvable and agent ready
    pub fn is_healthy(&self) -> bool {
        self.pack.is_ready(&self.prompt_name) && self.agent.is_ready()
    }

    /// Tools offered to the agent this turn
    pub fn resolve_tools(&self) -> Vec<ToolSpec> {
        match &self.tools {
            Some(dispatcher) => dispatcher.tools_for_prompt(&self.pack, &self.prompt_name),
            None => Vec::new(),
        }
    }

    /// Run one turn
    ///
    /// The stream ends right after its terminal message. The user message is
    /// saved before the agent runs; dropping the stream early abandons the
    /// rest of the turn and nothing the agent produced is saved.
    pub fn handle_turn(&self, turn: InboundTurn) -> impl Stream<Item = OutboundMessage> + Send + '_ {
        let trace_id = turn
            .trace_id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let span = info_span!(
            "conversation_turn",
            trace_id = %trace_id,
            session_id = %turn.session_id,
            otel.name = "conversation_turn"
        );

        async_stream::stream! {
            let mut outcome = TurnOutcome::start();
            let InboundTurn { session_id, content, metadata, .. } = turn;
            info!(parent: &span, "Turn started");

            let mut session = match self.store.get_or_create(&session_id).instrument(span.clone()).await {
                Ok(session) => session,
                Err(e) => {
                    error!(parent: &span, error = %e, "Failed to load session");
                    outcome.finish("error");
                    yield OutboundMessage::error(HANDLER_ERROR, e.to_string());
                    return;
                }
            };

            // Persisted up front so a failed or cancelled turn still keeps it
            session.add_message(Message::user(content));
            if let Err(e) = self.store.save(&mut session).instrument(span.clone()).await {
                error!(parent: &span, error = %e, "Failed to save user message");
                outcome.finish("error");
                yield OutboundMessage::error(HANDLER_ERROR, e.to_string());
                return;
            }

            let request = AgentRequest {
                messages: session.messages.clone(),
                tools: self.resolve_tools(),
                variables: extract_variables(&metadata, &span),
            };
            let mut events = self.agent.invoke(request);
            let mut translator = TurnTranslator::new();
            let mut failure = None;

            while let Some(event) = events.next().instrument(span.clone()).await {
                match event {
                    Ok(event) => {
                        if let Some(message) = translator.apply(event) {
                            yield message;
                        }
                    }
                    Err(e) => {
                        failure = Some(e.to_string());
                        break;
                    }
                }
            }
            drop(events);

            if let Some(message) = failure {
                error!(parent: &span, error = %message, "Turn failed");
                outcome.finish("error");
                yield OutboundMessage::error(HANDLER_ERROR, message);
                return;
            }

            if let Some(reply) = translator.assistant_message() {
                session.add_message(reply);
            }

            if let Err(e) = self.store.save(&mut session).instrument(span.clone()).await {
                error!(parent: &span, error = %e, "Failed to save session");
                outcome.finish("error");
                yield OutboundMessage::error(HANDLER_ERROR, e.to_string());
                return;
            }

            let usage = translator.usage();
            TOKENS_TOTAL.with_label_values(&["input"]).inc_by(f64::from(usage.input_tokens));
            TOKENS_TOTAL.with_label_values(&["output"]).inc_by(f64::from(usage.output_tokens));
            info!(
                parent: &span,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                messages = session.messages.len(),
                "Turn completed"
            );
            outcome.finish("done");
            yield translator.finish();
        }
    }
}

/// Prompt variables from turn metadata; malformed values are ignored
fn extract_variables(metadata: &HashMap<String, String>, span: &Span) -> HashMap<String, serde_json::Value> {
    let Some(raw) = metadata.get(VARIABLES_KEY).filter(|v| !v.is_empty()) else {
        return HashMap::new();
    };
    match serde_json::from_str::<HashMap<String, serde_json::Value>>(raw) {
        Ok(variables) => variables,
        Err(e) => {
            warn!(parent: span, error = %e, "Failed to parse variables from metadata");
            HashMap::new()
        }
    }
}
