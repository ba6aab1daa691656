//! Relay CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments or configuration
//! - 3: Backend failure

use std::process::ExitCode;

use clap::Parser;
use relay_chat::ChatError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands};

/// Process exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const BACKEND_FAILURE: u8 = 3;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "relay=debug" } else { "relay=info" };
    let mut filter = EnvFilter::from_default_env();
    for directive in [level, "warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Logs go to stderr so stdout stays clean for replies and frames
    let registry = tracing_subscriber::registry().with(filter);
    let log_result = if cli.json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    if log_result.is_err() {
        // Logging already initialized, continue
    }

    let global = cli.global();
    let result = match cli.command {
        Commands::Chat(args) => commands::chat::execute(&global, args).await,
        Commands::Session(args) => commands::session::execute(&global, args).await,
        Commands::Analyze(args) => commands::analyze::execute(&global, args).await,
        Commands::AnalyzeFile(args) => commands::analyze_file::execute(&global, args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    if let Some(chat_error) = e.downcast_ref::<ChatError>() {
        return match chat_error {
            ChatError::Config(_) | ChatError::Json(_) => ExitCodes::INVALID_ARGS,
            ChatError::BackendUnreachable(_) | ChatError::BackendBadResponse(_) => {
                ExitCodes::BACKEND_FAILURE
            }
            _ => ExitCodes::GENERAL_ERROR,
        };
    }

    let msg = e.to_string().to_lowercase();
    if msg.contains("backend") || msg.contains("model") {
        ExitCodes::BACKEND_FAILURE
    } else if msg.contains("argument") || msg.contains("not found") {
        ExitCodes::INVALID_ARGS
    } else {
        ExitCodes::GENERAL_ERROR
    }
}
