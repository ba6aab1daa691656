//! Analyze-file command - Review a single workspace file.

use anyhow::Result;
use clap::Args;
use relay_chat::ChannelSink;
use tokio::sync::mpsc;

use super::{spawn_chunk_printer, GlobalArgs};

#[derive(Args)]
pub struct AnalyzeFileArgs {
    /// Path relative to the workspace root
    path: String,

    /// Print the review as JSON
    #[arg(long)]
    json: bool,
}

pub async fn execute(global: &GlobalArgs, args: AnalyzeFileArgs) -> Result<()> {
    let orchestrator = global.orchestrator()?;

    let reply = if args.json {
        orchestrator.analyze_code(&args.path, None).await
    } else {
        let (sink, rx) = ChannelSink::channel(orchestrator.sink_buffer());
        let printer = spawn_chunk_printer(rx);
        let reply = orchestrator.analyze_code(&args.path, Some(&sink)).await;
        drop(sink);
        printer.await?;
        println!();
        reply
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reply)?);
    }

    if !reply.success {
        anyhow::bail!("{}: {}", args.path, reply.error.unwrap_or_default());
    }
    Ok(())
}
