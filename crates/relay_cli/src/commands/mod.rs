//! CLI command definitions.
//!
//! Each subcommand maps to one entry point of the chat engine.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_chat::{ChatOrchestrator, ChatReply, ServiceConfig, StreamFrame};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub mod analyze;
pub mod analyze_file;
pub mod chat;
pub mod session;

/// Relay - hybrid local/remote coding assistant
#[derive(Parser)]
#[command(name = "relay")]
#[command(version, about = "Relay - hybrid local/remote coding assistant")]
#[command(long_about = r#"
Relay answers coding questions with a local model server, hands code
generation and debugging to a hosted chat-completions API, and analyzes
the project workspace on request.

COMMANDS:
  chat          → Send one message and print the streamed answer
  session       → Read messages from stdin, emit JSON frames on stdout
  analyze       → Multi-step report on the workspace
  analyze-file  → Review a single workspace file

CONFIGURATION:
  OLLAMA_URL, LOCAL_MODEL, REMOTE_API_URL, REMOTE_API_KEY (or CLAUDE_API_KEY),
  REMOTE_MODEL, RELAY_WORKSPACE

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments or configuration
  3 - Backend failure
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// JSON settings file (environment variables still take precedence)
    #[arg(long, global = true, env = "RELAY_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Workspace root to analyze
    #[arg(short, long, global = true)]
    pub workspace: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn global(&self) -> GlobalArgs {
        GlobalArgs {
            settings: self.settings.clone(),
            workspace: self.workspace.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send one message and print the answer
    Chat(chat::ChatArgs),

    /// Interactive session speaking the JSON frame protocol
    Session(session::SessionArgs),

    /// Produce a multi-step project report
    Analyze(analyze::AnalyzeArgs),

    /// Review a single file in the workspace
    #[command(name = "analyze-file")]
    AnalyzeFile(analyze_file::AnalyzeFileArgs),
}

/// Options shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub settings: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
}

impl GlobalArgs {
    /// Resolve configuration from the settings file or the environment.
    pub fn config(&self) -> Result<ServiceConfig> {
        let mut config = match self.settings {
            Some(ref path) => ServiceConfig::from_settings(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => ServiceConfig::from_env(),
        };
        if let Some(ref workspace) = self.workspace {
            config = config.workspace_root(workspace);
        }
        debug!("Workspace root: {}", config.workspace_root.display());
        Ok(config)
    }

    pub fn orchestrator(&self) -> Result<ChatOrchestrator> {
        let config = self.config()?;
        Ok(ChatOrchestrator::from_config(&config)?)
    }
}

/// Print `message` frames as plain text while they arrive.
///
/// The task resolves to the number of chunks printed once every sender is gone.
pub(crate) fn spawn_chunk_printer(mut rx: mpsc::Receiver<StreamFrame>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut printed = 0;
        let mut stdout = std::io::stdout();
        while let Some(frame) = rx.recv().await {
            if let StreamFrame::Message { content } = frame {
                printed += 1;
                let _ = write!(stdout, "{}", content);
                let _ = stdout.flush();
            }
        }
        printed
    })
}

/// Text still to print once a call has finished.
///
/// Streamed chunks already showed the answer; only whole replies that arrived
/// without chunks are printed here.
pub(crate) fn unprinted_text(reply: &ChatReply, printed_chunks: usize) -> &str {
    if printed_chunks > 0 {
        ""
    } else {
        reply.text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::parse_from(["relay", "chat", "hello", "--workspace", "/tmp/ws", "-v"]);
        assert!(cli.verbose);
        assert_eq!(cli.global().workspace, Some(PathBuf::from("/tmp/ws")));
        assert!(matches!(cli.command, Commands::Chat(_)));
    }

    #[test]
    fn test_config_from_settings_with_workspace_override() {
        let temp = tempdir().unwrap();
        let settings = temp.path().join("relay.json");
        std::fs::write(&settings, r#"{"sink_buffer": 8}"#).unwrap();

        let global = GlobalArgs {
            settings: Some(settings),
            workspace: Some(temp.path().to_path_buf()),
        };
        let config = global.config().unwrap();
        assert_eq!(config.sink_buffer, 8);
        assert_eq!(config.workspace_root, temp.path());
    }

    #[test]
    fn test_streamed_reply_is_not_printed_twice() {
        let reply = ChatReply::success("r1", "=== Summary ===\nfine", relay_chat::Backend::Local);
        assert_eq!(unprinted_text(&reply, 7), "");
        assert_eq!(unprinted_text(&reply, 0), "=== Summary ===\nfine");
    }

    #[test]
    fn test_invalid_settings_file() {
        let temp = tempdir().unwrap();
        let settings = temp.path().join("relay.json");
        std::fs::write(&settings, "not json").unwrap();

        let global = GlobalArgs {
            settings: Some(settings),
            workspace: None,
        };
        assert!(global.config().is_err());
    }
}
