//! Session command - Interactive chat over stdin/stdout.
//!
//! Each input line is either plain message text or a JSON chat request.
//! Every outbound frame is written to stdout as one JSON line:
//! `{"type":"message","content":...}` while an answer streams, then
//! `{"type":"reply",...}` with the final result.

use std::io::Write;

use anyhow::Result;
use clap::Args;
use relay_chat::{new_conversation_id, ChatRequest, StreamFrame};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::GlobalArgs;

#[derive(Args)]
pub struct SessionArgs {
    /// Conversation identifier for plain-text lines
    #[arg(short, long)]
    conversation: Option<String>,
}

/// Interpret one input line.
fn parse_line(line: &str, conversation_id: &str) -> Option<ChatRequest> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') {
        match serde_json::from_str::<ChatRequest>(trimmed) {
            Ok(request) => return Some(request),
            Err(e) => warn!("Treating line as text, not a request: {}", e),
        }
    }
    Some(ChatRequest::new(conversation_id, trimmed))
}

pub async fn execute(global: &GlobalArgs, args: SessionArgs) -> Result<()> {
    let orchestrator = global.orchestrator()?;
    let conversation_id = args.conversation.unwrap_or_else(new_conversation_id);
    info!("Session started for conversation {}", conversation_id);

    let (tx, mut rx) = mpsc::channel::<StreamFrame>(orchestrator.sink_buffer());
    let writer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(frame) = rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    let _ = writeln!(stdout, "{}", json);
                    let _ = stdout.flush();
                }
                Err(e) => warn!("Failed to encode frame: {}", e),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(request) = parse_line(&line, &conversation_id) else {
            continue;
        };
        orchestrator.chat_streamed(&request, tx.clone()).await;
    }

    drop(tx);
    writer.await?;
    info!("Session for conversation {} closed", conversation_id);
    Ok(())
}
