//! # relay_chat
//!
//! Hybrid local/remote chat dispatch for Relay.
//!
//! Each incoming message is classified and sent to one of three places:
//! a project-analysis pipeline, a hosted chat-completions backend, or a
//! local model server that streams its answer token by token. Streamed
//! tokens are relayed to whoever is listening while the full answer is
//! assembled and recorded in the conversation history.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐
//! │ ChatRequest  │────▶│    Router    │
//! └──────────────┘     └──────┬───────┘
//!                             │
//!        ┌────────────────────┼─────────────────────┐
//!        ▼                    ▼                     ▼
//! ┌──────────────┐    ┌──────────────┐     ┌─────────────────┐
//! │   Project    │    │    Remote    │     │  Local stream   │
//! │   Analyzer   │    │  completion  │     │   aggregator    │
//! └──────┬───────┘    └──────┬───────┘     └────────┬────────┘
//!        │                   │                      │
//!        │                   ▼                      │
//!        │          ┌─────────────────┐             │
//!        │          │ Conversation    │◀────────────┤
//!        │          │ store           │             │
//!        │          └─────────────────┘             │
//!        ▼                                          ▼
//!                   ┌─────────────────┐
//!                   │  Sink registry  │ (live chunks)
//!                   └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use relay_chat::{ChatOrchestrator, ChatRequest, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::from_env();
//!     let orchestrator = ChatOrchestrator::from_config(&config)?;
//!
//!     let reply = orchestrator
//!         .chat(&ChatRequest::new("demo", "explain this function"), None)
//!         .await;
//!     println!("{}", reply.text());
//!
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod client;
pub mod config;
pub mod error;
pub mod mock;
pub mod orchestrator;
pub mod router;
pub mod scan;
pub mod sink;
pub mod store;
pub mod stream;
pub mod types;

pub use analyzer::{
    AnalysisOutcome, AnalysisStats, AnalysisStep, ProjectAnalyzer, StepContext, StepDescriptor,
    StepFailure, StepPlan,
};
pub use client::{CompletionClient, LineStream, OllamaClient, RemoteChatClient, StreamingClient};
pub use config::{
    AnalysisConfig, LocalBackendConfig, ManifestSpec, RemoteBackendConfig, RoutingConfig,
    ScanConfig, ServiceConfig,
};
pub use error::{ChatError, ChatResult};
pub use mock::{MockBackend, MockLine, MockStream};
pub use orchestrator::{ChatOrchestrator, CodeAnalysisReply, FOLLOW_UP_HINT};
pub use router::{AnalysisFocus, Disposition, Router, RoutingRule, RuleTarget};
pub use scan::{scan_workspace, EntryKind, FileStructureEntry, ScanMode, ScanReport};
pub use sink::{ChannelSink, CollectingSink, ProgressSink, SinkBinding, SinkRegistry};
pub use store::ConversationStore;
pub use stream::{run_streaming, StreamOutput, StreamStats};
pub use types::{
    new_conversation_id, Backend, ChatReply, ChatRequest, ConversationId, FileContext, Message,
    MessageRole, StreamFrame,
};
