//! Analyze command - Multi-step project report.

use anyhow::Result;
use clap::Args;
use relay_chat::{new_conversation_id, ChannelSink, ProgressSink};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use super::{spawn_chunk_printer, unprinted_text, GlobalArgs};

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Print only the final report, without live progress
    #[arg(short, long)]
    quiet: bool,
}

pub async fn execute(global: &GlobalArgs, args: AnalyzeArgs) -> Result<()> {
    let orchestrator = global.orchestrator()?;
    let report_id = new_conversation_id();
    info!("Starting project report {}", report_id);

    let (reply, printed) = if args.quiet {
        (orchestrator.analyze_project(&report_id, None).await, 0)
    } else {
        let (tx, rx) = mpsc::channel(orchestrator.sink_buffer());
        let printer = spawn_chunk_printer(rx);
        let sink: Arc<dyn ProgressSink> = Arc::new(ChannelSink::new(tx));
        let reply = orchestrator.analyze_project(&report_id, Some(sink)).await;
        (reply, printer.await?)
    };

    if !reply.success {
        if printed > 0 {
            println!();
        }
        anyhow::bail!("Backend failure: {}", reply.text());
    }

    println!("{}", unprinted_text(&reply, printed));
    Ok(())
}
