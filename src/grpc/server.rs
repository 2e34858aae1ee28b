use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info, warn};

use crate::conversation::{ConversationHandler, InboundTurn, OutboundMessage, INTERNAL_ERROR};
use crate::metrics::STREAMS_ACTIVE;
use crate::session::{Content, ContentPart};

// Include the generated proto code

pub mod proto {
    tonic::include_proto!("agentruntime.v1");
}

use proto::runtime_service_server::RuntimeService;
use proto::server_message::Message;
use proto::{ClientMessage, HealthRequest, HealthResponse, ServerMessage};

/// Metadata header carrying a caller-chosen trace id
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Outbound buffer per stream
const OUTBOUND_BUFFER: usize = 64;

pub struct RuntimeServer {
    handler: Arc<ConversationHandler>,
}

impl RuntimeServer {
    pub fn new(handler: Arc<ConversationHandler>) -> Self {
        Self { handler }
    }
}

/// Decrements the active stream gauge when the stream task ends
struct ActiveStream;

impl ActiveStream {
    fn open() -> Self {
        STREAMS_ACTIVE.inc();
        ActiveStream
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        STREAMS_ACTIVE.dec();
    }
}

/// Build the turn for one client message; `parts` win over `content`
pub fn inbound_turn(message: ClientMessage, trace_id: Option<String>) -> InboundTurn {
    let content = if message.parts.is_empty() {
        Content::Text(message.content)
    } else {
        Content::Parts(message.parts.into_iter().filter_map(content_part).collect())
    };

    InboundTurn {
        session_id: message.session_id,
        content,
        metadata: message.metadata,
        trace_id,
    }
}

fn content_part(part: proto::ContentPart) -> Option<ContentPart> {
    match part.r#type.as_str() {
        "text" => Some(ContentPart::Text { text: part.text }),
        "image" => {
            let media = part.media?;
            if !media.url.is_empty() {
                Some(ContentPart::ImageUrl { url: media.url })
            } else if !media.data.is_empty() {
                Some(ContentPart::ImageData { data: media.data, mime_type: media.mime_type })
            } else {
                None
            }
        }
        other => {
            debug!(part_type = other, "Ignoring unknown content part");
            None
        }
    }
}

impl From<OutboundMessage> for ServerMessage {
    fn from(message: OutboundMessage) -> Self {
        let message = match message {
            OutboundMessage::Chunk { content } => Message::Chunk(proto::Chunk { content }),
            OutboundMessage::ToolCall { id, name, arguments_json } => {
                Message::ToolCall(proto::ToolCall { id, name, arguments_json })
            }
            OutboundMessage::ToolResult { id, result_json, is_error } => {
                Message::ToolResult(proto::ToolResult { id, result_json, is_error })
            }
            OutboundMessage::Done { final_content, usage } => Message::Done(proto::Done {
                final_content,
                usage: Some(proto::Usage {
                    input_tokens: i32::try_from(usage.input_tokens).unwrap_or(i32::MAX),
                    output_tokens: i32::try_from(usage.output_tokens).unwrap_or(i32::MAX),
                }),
            }),
            OutboundMessage::Error { code, message } => {
                Message::Error(proto::Error { code, message })
            }
        };
        ServerMessage { message: Some(message) }
    }
}

fn trace_id_of(metadata: &tonic::metadata::MetadataMap) -> Option<String> {
    metadata
        .get(TRACE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Drive one Converse stream: turns run strictly one after another
async fn pump(
    handler: Arc<ConversationHandler>,
    mut inbound: Streaming<ClientMessage>,
    tx: mpsc::Sender<Result<ServerMessage, Status>>,
    trace_id: Option<String>,
) {
    let _active = ActiveStream::open();

    loop {
        let message = match inbound.message().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("Client closed conversation stream");
                return;
            }
            Err(status) if is_disconnect(&status) => {
                info!(code = ?status.code(), "Conversation cancelled by client");
                return;
            }
            Err(status) => {
                error!(error = %status, "Error in conversation stream");
                let internal = OutboundMessage::error(INTERNAL_ERROR, status.message());
                let _ = tx.send(Ok(internal.into())).await;
                return;
            }
        };

        info!(
            session_id = %message.session_id,
            has_parts = !message.parts.is_empty(),
            "Received message"
        );

        let turn = handler.handle_turn(inbound_turn(message, trace_id.clone()));
        futures_util::pin_mut!(turn);
        loop {
            // Returning drops the turn, which abandons it
            let outbound = tokio::select! {
                next = turn.next() => match next {
                    Some(outbound) => outbound,
                    None => break,
                },
                _ = tx.closed() => {
                    warn!("Client cancelled mid-turn");
                    return;
                }
            };
            if tx.send(Ok(outbound.into())).await.is_err() {
                warn!("Client went away mid-turn");
                return;
            }
        }
    }
}

fn is_disconnect(status: &Status) -> bool {
    matches!(status.code(), tonic::Code::Cancelled | tonic::Code::Unavailable)
}

#[tonic::async_trait]
impl RuntimeService for RuntimeServer {
    type ConverseStream = ReceiverStream<Result<ServerMessage, Status>>;

    async fn converse(
        &self,
        request: Request<Streaming<ClientMessage>>,
    ) -> Result<Response<Self::ConverseStream>, Status> {
        let trace_id = trace_id_of(request.metadata());
        let inbound = request.into_inner();

        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        tokio::spawn(pump(self.handler.clone(), inbound, tx, trace_id));

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn health(
        &self,
        _request: Request<HealthRequest>,
    ) -> Result<Response<HealthResponse>, Status> {
        let healthy = self.handler.is_healthy();
        Ok(Response::new(HealthResponse {
            healthy,
            status: if healthy { "ready" } else { "not ready" }.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::llm::Usage;

    fn metadata(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parts_take_precedence_over_content() {
        let message = ClientMessage {
            session_id: "s".into(),
            content: "ignored".into(),
            metadata: metadata(&[("k", "v")]),
            parts: vec![
                proto::ContentPart { r#type: "text".into(), text: "look".into(), media: None },
                proto::ContentPart {
                    r#type: "image".into(),
                    text: String::new(),
                    media: Some(proto::MediaContent {
                        url: String::new(),
                        data: "aGk=".into(),
                        mime_type: "image/png".into(),
                    }),
                },
                proto::ContentPart { r#type: "audio".into(), text: String::new(), media: None },
            ],
        };

        let turn = inbound_turn(message, Some("trace-1".into()));
        assert_eq!(turn.session_id, "s");
        assert_eq!(turn.trace_id.as_deref(), Some("trace-1"));
        assert_eq!(turn.metadata.get("k").map(String::as_str), Some("v"));
        assert_eq!(
            turn.content,
            Content::Parts(vec![
                ContentPart::Text { text: "look".into() },
                ContentPart::ImageData { data: "aGk=".into(), mime_type: "image/png".into() },
            ])
        );
    }

    #[test]
    fn test_plain_content() {
        let message = ClientMessage { session_id: "s".into(), content: "hello".into(), ..Default::default() };
        assert_eq!(inbound_turn(message, None).content, Content::Text("hello".into()));
    }

    #[test]
    fn test_image_url_part() {
        let part = proto::ContentPart {
            r#type: "image".into(),
            text: String::new(),
            media: Some(proto::MediaContent { url: "https://x/cat.png".into(), ..Default::default() }),
        };
        assert_eq!(content_part(part), Some(ContentPart::ImageUrl { url: "https://x/cat.png".into() }));
    }

    #[test]
    fn test_outbound_conversion() {
        let done: ServerMessage = OutboundMessage::Done {
            final_content: "Hi there".into(),
            usage: Usage::new(5, 3),
        }
        .into();
        let Some(Message::Done(done)) = done.message else {
            panic!("expected done");
        };
        assert_eq!(done.final_content, "Hi there");
        assert_eq!(done.usage, Some(proto::Usage { input_tokens: 5, output_tokens: 3 }));

        let error: ServerMessage = OutboundMessage::error("HANDLER_ERROR", "boom").into();
        assert!(matches!(error.message, Some(Message::Error(ref e)) if e.code == "HANDLER_ERROR"));
    }
}
