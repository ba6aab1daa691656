//! Chat command - Send one message.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use relay_chat::{new_conversation_id, ChatRequest, FileContext};
use tokio::sync::mpsc;
use tracing::info;

use super::{spawn_chunk_printer, unprinted_text, GlobalArgs};

#[derive(Args)]
pub struct ChatArgs {
    /// Message to send
    message: String,

    /// Conversation to continue (a new one is started if omitted)
    #[arg(short, long)]
    conversation: Option<String>,

    /// System prompt placed before the history
    #[arg(long)]
    system: Option<String>,

    /// File to attach as context
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Language of the attached file
    #[arg(long, requires = "file")]
    language: Option<String>,
}

pub async fn execute(global: &GlobalArgs, args: ChatArgs) -> Result<()> {
    let orchestrator = global.orchestrator()?;
    let conversation_id = args.conversation.unwrap_or_else(new_conversation_id);
    info!("Conversation {}", conversation_id);

    let mut request = ChatRequest::new(&conversation_id, args.message);
    if let Some(system) = args.system {
        request = request.system_prompt(system);
    }
    if let Some(path) = args.file {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("File not found: {}", path.display()))?;
        let mut context = FileContext::new(content).path(path.display().to_string());
        if let Some(language) = args.language {
            context = context.language(language);
        }
        request = request.file_context(context);
    }

    let (tx, rx) = mpsc::channel(orchestrator.sink_buffer());
    let printer = spawn_chunk_printer(rx);
    let reply = orchestrator.chat_streamed(&request, tx).await;
    let printed = printer.await?;

    if !reply.success {
        anyhow::bail!("Backend failure: {}", reply.text());
    }

    println!("{}", unprinted_text(&reply, printed));
    Ok(())
}
