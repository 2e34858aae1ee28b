//! Interactive client for the Converse stream.
//!
//! Reads one message per stdin line and prints the streamed reply.
//!
//! Usage: converse-client [ADDR] [SESSION_ID]
//!   ADDR        defaults to $RUNTIME_ADDR or http://127.0.0.1:9000
//!   SESSION_ID  defaults to a fresh UUID

use std::env;
use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use agent_runtime::grpc::proto::runtime_service_client::RuntimeServiceClient;
use agent_runtime::grpc::proto::server_message::Message;
use agent_runtime::grpc::proto::{ClientMessage, HealthRequest};

const DEFAULT_ADDR: &str = "http://127.0.0.1:9000";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = env::args()
        .nth(1)
        .or_else(|| env::var("RUNTIME_ADDR").ok())
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let session_id = env::args().nth(2).unwrap_or_else(|| Uuid::now_v7().to_string());

    let mut client = RuntimeServiceClient::connect(addr.clone()).await?;
    let health = client.health(HealthRequest {}).await?.into_inner();
    println!("[CLIENT] Connected to {} ({})", addr, health.status);
    println!("[CLIENT] Session {}", session_id);

    let (tx, rx) = mpsc::channel::<ClientMessage>(8);
    let mut replies = client.converse(ReceiverStream::new(rx)).await?.into_inner();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print!("> ");
    std::io::stdout().flush()?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            print!("> ");
            std::io::stdout().flush()?;
            continue;
        }

        tx.send(ClientMessage {
            session_id: session_id.clone(),
            content: line,
            ..Default::default()
        })
        .await?;

        // Print until the turn's terminal message
        while let Some(reply) = replies.message().await? {
            match reply.message {
                Some(Message::Chunk(chunk)) => {
                    print!("{}", chunk.content);
                    std::io::stdout().flush()?;
                }
                Some(Message::ToolCall(call)) => {
                    println!("\n[TOOL] {}({})", call.name, call.arguments_json);
                }
                Some(Message::ToolResult(result)) => {
                    let tag = if result.is_error { "TOOL ERROR" } else { "TOOL RESULT" };
                    println!("[{}] {}", tag, result.result_json);
                }
                Some(Message::Done(done)) => {
                    let usage = done.usage.unwrap_or_default();
                    println!(
                        "\n[DONE] tokens in={} out={}",
                        usage.input_tokens, usage.output_tokens
                    );
                    break;
                }
                Some(Message::Error(error)) => {
                    println!("\n[ERROR] {}: {}", error.code, error.message);
                    break;
                }
                None => {}
            }
        }

        print!("> ");
        std::io::stdout().flush()?;
    }

    Ok(())
}
