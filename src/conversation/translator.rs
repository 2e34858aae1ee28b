//! Reasoning events to outbound messages

use super::OutboundMessage;
use crate::agent::ReasoningEvent;
use crate::llm::Usage;
use crate::session::Message;

/// Where a turn is, as seen from the events consumed so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    AgentRunning,
    StreamingText,
    ToolDispatching,
    Finalizing,
}

/// Per-turn state: accumulated text and usage
///
/// Events must be applied in emission order; each yields at most one
/// outbound message.
#[derive(Debug)]
pub struct TurnTranslator {
    final_text: String,
    usage: Usage,
    phase: TurnPhase,
}

impl Default for TurnTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnTranslator {
    pub fn new() -> Self {
        Self {
            final_text: String::new(),
            usage: Usage::default(),
            phase: TurnPhase::AgentRunning,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn final_text(&self) -> &str {
        &self.final_text
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn apply(&mut self, event: ReasoningEvent) -> Option<OutboundMessage> {
        match event {
            ReasoningEvent::TextDelta(content) => {
                self.phase = TurnPhase::StreamingText;
                if content.is_empty() {
                    return None;
                }
                self.final_text.push_str(&content);
                Some(OutboundMessage::Chunk { content })
            }
            ReasoningEvent::ToolStarted { run_id, name, arguments } => {
                self.phase = TurnPhase::ToolDispatching;
                Some(OutboundMessage::ToolCall {
                    id: run_id,
                    name,
                    arguments_json: arguments.to_string(),
                })
            }
            ReasoningEvent::ToolFinished { run_id, result, is_error } => {
                self.phase = TurnPhase::AgentRunning;
                Some(OutboundMessage::ToolResult {
                    id: run_id,
                    result_json: result,
                    is_error,
                })
            }
            ReasoningEvent::TurnCompleted { usage } => {
                self.phase = TurnPhase::Finalizing;
                if let Some(usage) = usage {
                    self.usage.add(usage);
                }
                None
            }
        }
    }

    /// Assistant reply to record, `None` when the turn produced no text
    pub fn assistant_message(&self) -> Option<Message> {
        (!self.final_text.is_empty()).then(|| Message::assistant(self.final_text.clone()))
    }

    /// The terminal `Done` message
    pub fn finish(self) -> OutboundMessage {
        OutboundMessage::Done {
            final_content: self.final_text,
            usage: self.usage,
        }
    }
}
