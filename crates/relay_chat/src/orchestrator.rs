//! Chat orchestration.
//!
//! This module provides the main entry point for chat operations,
//! coordinating routing, conversation history, the two model backends and
//! project analysis.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::analyzer::ProjectAnalyzer;
use crate::client::{CompletionClient, OllamaClient, RemoteChatClient, StreamingClient};
use crate::config::ServiceConfig;
use crate::error::ChatResult;
use crate::router::{AnalysisFocus, Disposition, Router};
use crate::scan::read_excerpt;
use crate::sink::{ChannelSink, ProgressSink, SinkRegistry};
use crate::store::ConversationStore;
use crate::stream::run_streaming;
use crate::types::{Backend, ChatReply, ChatRequest, Message, StreamFrame};

/// Appended to a structure analysis to invite the deeper follow-up.
pub const FOLLOW_UP_HINT: &str =
    "\n\nYou can ask me to 'analyze project core files' to see how the important files are implemented.";

/// Result of a single-file code review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeAnalysisReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub model: Backend,
}

/// Main chat entry point shared by one-shot and streamed calls.
pub struct ChatOrchestrator {
    store: Arc<ConversationStore>,
    sinks: Arc<SinkRegistry>,
    router: Router,
    local: Arc<dyn StreamingClient>,
    remote: Arc<dyn CompletionClient>,
    analyzer: ProjectAnalyzer,
    local_preamble: Option<String>,
    sink_buffer: usize,
}

impl ChatOrchestrator {
    /// Create an orchestrator over explicit backend clients.
    pub fn new(
        config: &ServiceConfig,
        local: Arc<dyn StreamingClient>,
        remote: Arc<dyn CompletionClient>,
    ) -> Self {
        let analyzer = ProjectAnalyzer::new(
            Arc::clone(&local),
            config.workspace_root.clone(),
            config.scan.clone(),
            config.analysis.clone(),
        );

        Self {
            store: Arc::new(ConversationStore::new()),
            sinks: Arc::new(SinkRegistry::new()),
            router: Router::new(&config.routing),
            local,
            remote,
            analyzer,
            local_preamble: config.local_preamble.clone(),
            sink_buffer: config.sink_buffer,
        }
    }

    /// Create an orchestrator talking to the HTTP backends named in `config`.
    pub fn from_config(config: &ServiceConfig) -> ChatResult<Self> {
        let local = Arc::new(OllamaClient::new(&config.local)?);
        let remote = Arc::new(RemoteChatClient::new(&config.remote)?);
        if !remote.has_api_key() {
            warn!("No remote API key configured; code-generation requests will fail");
        }
        Ok(Self::new(config, local, remote))
    }

    /// Share an existing conversation store.
    pub fn with_store(mut self, store: Arc<ConversationStore>) -> Self {
        self.store = store;
        self
    }

    /// Replace the routing table.
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn sinks(&self) -> &Arc<SinkRegistry> {
        &self.sinks
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Capacity to use for a persistent connection's frame queue.
    pub fn sink_buffer(&self) -> usize {
        self.sink_buffer
    }

    /// Answer one message. Never fails; errors come back as a failure reply.
    ///
    /// History is only touched after a successful single-turn exchange.
    pub async fn chat(&self, request: &ChatRequest, sink: Option<Arc<dyn ProgressSink>>) -> ChatReply {
        let conversation_id = request.conversation_id.as_str();
        self.store.ensure(conversation_id);

        let disposition = self.router.classify(&request.message);
        info!("Conversation {} routed to {:?}", conversation_id, disposition);

        match disposition {
            Disposition::ProjectAnalysis { focus } => {
                self.run_analysis(conversation_id, focus, sink).await
            }
            Disposition::RemoteBackend => {
                let messages = self.build_messages(request);
                let result = self.remote.complete(&messages).await;
                self.finish_exchange(request, Backend::Remote, result)
            }
            Disposition::LocalBackend => {
                let messages = self.build_messages(request);
                let prompt = self.flatten(&messages);
                let result = {
                    let binding = sink.map(|s| self.sinks.bind(conversation_id, s));
                    let progress = binding.as_ref().map(|b| b as &dyn ProgressSink);
                    run_streaming(self.local.as_ref(), &prompt, progress)
                        .await
                        .map(|output| output.text)
                };
                self.finish_exchange(request, Backend::Local, result)
            }
        }
    }

    /// Answer one message over a persistent connection.
    ///
    /// Intermediate chunks are pushed as `message` frames while the call runs;
    /// the final reply follows as a `reply` frame.
    pub async fn chat_streamed(
        &self,
        request: &ChatRequest,
        frames: mpsc::Sender<StreamFrame>,
    ) -> ChatReply {
        let sink: Arc<dyn ProgressSink> = Arc::new(ChannelSink::new(frames.clone()));
        let reply = self.chat(request, Some(sink)).await;
        if frames.send(StreamFrame::Reply(reply.clone())).await.is_err() {
            warn!(
                "Connection for conversation {} closed before the reply was sent",
                request.conversation_id
            );
        }
        reply
    }

    /// Standalone multi-step project report. History is not touched.
    pub async fn analyze_project(
        &self,
        conversation_id: &str,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> ChatReply {
        let outcome = {
            let binding = sink.map(|s| self.sinks.bind(conversation_id, s));
            let progress = binding.as_ref().map(|b| b as &dyn ProgressSink);
            self.analyzer.analyze_project_structure(progress).await
        };

        if outcome.is_success() {
            ChatReply::success(conversation_id, outcome.render(), Backend::Local)
        } else {
            ChatReply::failure(conversation_id, outcome.render(), Some(Backend::Local))
        }
    }

    /// Review a single workspace file with the local model.
    pub async fn analyze_code(
        &self,
        relative_path: &str,
        sink: Option<&dyn ProgressSink>,
    ) -> CodeAnalysisReply {
        let failed = |error: String| CodeAnalysisReply {
            success: false,
            analysis: None,
            error: Some(error),
            model: Backend::Local,
        };

        if !self.analyzer.root().join(relative_path).is_file() {
            return failed("File not found".to_string());
        }
        let code = match read_excerpt(self.analyzer.root(), relative_path, usize::MAX) {
            Ok(code) => code,
            Err(e) => return failed(e.to_string()),
        };

        let prompt = format!(
            "Task: analyze\n\n\
             Code to analyze:\n```\n{}\n```\n\n\
             Please provide a detailed analysis covering:\n\
             1. The main purpose of the code\n\
             2. Its structure\n\
             3. Possible improvements\n\
             4. Performance and security considerations",
            code
        );

        match run_streaming(self.local.as_ref(), &prompt, sink).await {
            Ok(output) => CodeAnalysisReply {
                success: true,
                analysis: Some(output.text),
                error: None,
                model: Backend::Local,
            },
            Err(e) => failed(e.to_string()),
        }
    }

    async fn run_analysis(
        &self,
        conversation_id: &str,
        focus: AnalysisFocus,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> ChatReply {
        let binding = sink.map(|s| self.sinks.bind(conversation_id, s));
        let progress = binding.as_ref().map(|b| b as &dyn ProgressSink);

        let outcome = self.analyzer.analyze(focus, progress).await;
        if !outcome.is_success() {
            return ChatReply::failure(conversation_id, outcome.render(), Some(Backend::Local));
        }

        let mut text = outcome.render();
        if focus == AnalysisFocus::Structure {
            text.push_str(FOLLOW_UP_HINT);
            if let Some(sink) = progress {
                if let Err(e) = sink.deliver(FOLLOW_UP_HINT) {
                    warn!("Dropping follow-up hint: {}", e);
                }
            }
        }

        ChatReply::success(conversation_id, text, Backend::Local)
    }

    /// `[system] + [file context] + history + new user message`.
    fn build_messages(&self, request: &ChatRequest) -> Vec<Message> {
        let mut messages = Vec::new();
        if let Some(ref prompt) = request.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        if let Some(ref context) = request.file_context {
            messages.push(Message::system(context.to_excerpt()));
        }
        messages.extend(self.store.history(&request.conversation_id));
        messages.push(Message::user(request.message.clone()));
        messages
    }

    /// Role-prefixed lines, one message per line.
    fn flatten(&self, messages: &[Message]) -> String {
        let body = messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        match self.local_preamble {
            Some(ref preamble) => format!("{}\n\n{}", preamble, body),
            None => body,
        }
    }

    fn finish_exchange(
        &self,
        request: &ChatRequest,
        backend: Backend,
        result: ChatResult<String>,
    ) -> ChatReply {
        match result {
            Ok(answer) => {
                self.store.append_exchange(
                    &request.conversation_id,
                    Message::user(request.message.clone()),
                    Message::assistant(answer.clone()),
                );
                ChatReply::success(request.conversation_id.clone(), answer, backend)
            }
            Err(e) => {
                warn!(
                    "{} backend failed for conversation {}: {}",
                    backend, request.conversation_id, e
                );
                ChatReply::failure(request.conversation_id.clone(), e.to_string(), Some(backend))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockCompletionClient, MockStreamingClient};
    use crate::error::ChatError;
    use crate::mock::{MockBackend, MockStream};
    use crate::sink::CollectingSink;
    use crate::types::{FileContext, MessageRole};
    use futures::StreamExt;

    fn orchestrator(mock: &MockBackend) -> ChatOrchestrator {
        let config = ServiceConfig::default().workspace_root("/nonexistent-relay-workspace");
        ChatOrchestrator::new(&config, Arc::new(mock.clone()), Arc::new(mock.clone()))
    }

    #[tokio::test]
    async fn test_remote_receives_full_message_list() {
        let mut remote = MockCompletionClient::new();
        remote
            .expect_complete()
            .withf(|messages| {
                messages.len() == 3
                    && messages[0].role == MessageRole::System
                    && messages[0].content == "be terse"
                    && messages[1].content.contains("```rust\nfn main() {}\n```")
                    && messages[2].role == MessageRole::User
            })
            .times(1)
            .returning(|_| Ok("fixed".to_string()));

        let mut local = MockStreamingClient::new();
        local.expect_open_stream().never();

        let orchestrator = ChatOrchestrator::new(
            &ServiceConfig::default(),
            Arc::new(local),
            Arc::new(remote),
        );

        let request = ChatRequest::new("c1", "please fix this bug")
            .system_prompt("be terse")
            .file_context(FileContext::new("fn main() {}").language("rust"));
        let reply = orchestrator.chat(&request, None).await;

        assert_eq!(reply, ChatReply::success("c1", "fixed", Backend::Remote));
        assert_eq!(orchestrator.store().len("c1"), 2);
    }

    #[tokio::test]
    async fn test_remote_failure_leaves_history_untouched() {
        let mut remote = MockCompletionClient::new();
        remote
            .expect_complete()
            .returning(|_| Err(ChatError::BackendUnreachable("dns failure".to_string())));
        let local = MockStreamingClient::new();

        let orchestrator = ChatOrchestrator::new(
            &ServiceConfig::default(),
            Arc::new(local),
            Arc::new(remote),
        );

        let reply = orchestrator
            .chat(&ChatRequest::new("c1", "generate a parser"), None)
            .await;

        assert!(!reply.success);
        assert!(reply.error.unwrap().contains("dns failure"));
        assert_eq!(reply.model, Some(Backend::Remote));
        assert!(orchestrator.store().contains("c1"));
        assert_eq!(orchestrator.store().len("c1"), 0);
    }

    #[tokio::test]
    async fn test_local_prompt_is_flattened_with_history() {
        let mock = MockBackend::new()
            .add_stream(MockStream::tokens(&["r1"]))
            .add_stream(MockStream::tokens(&["r2"]));
        let orchestrator = orchestrator(&mock);

        orchestrator.chat(&ChatRequest::new("c1", "hi"), None).await;
        let reply = orchestrator
            .chat(&ChatRequest::new("c1", "how are you"), None)
            .await;

        assert_eq!(reply.message.as_deref(), Some("r2"));
        assert_eq!(mock.prompts()[1], "user: hi\nassistant: r1\nuser: how are you");
    }

    #[tokio::test]
    async fn test_local_preamble() {
        let mock = MockBackend::new();
        let config = ServiceConfig::default().local_preamble("Answer in Chinese.");
        let orchestrator =
            ChatOrchestrator::new(&config, Arc::new(mock.clone()), Arc::new(mock.clone()));

        orchestrator.chat(&ChatRequest::new("c1", "hello"), None).await;
        assert_eq!(mock.prompts()[0], "Answer in Chinese.\n\nuser: hello");
    }

    #[tokio::test]
    async fn test_local_sink_bound_only_during_call() {
        let mock = MockBackend::new().add_stream(MockStream::tokens(&["a", "b"]));
        let orchestrator = orchestrator(&mock);
        let sink = CollectingSink::new();

        let reply = orchestrator
            .chat(&ChatRequest::new("c1", "hello"), Some(Arc::new(sink.clone())))
            .await;

        assert!(reply.success);
        assert_eq!(sink.chunks(), vec!["a", "b"]);
        assert!(!orchestrator.sinks().is_bound("c1"));
    }

    #[tokio::test]
    async fn test_analysis_is_not_recorded_in_history() {
        let mock = MockBackend::new();
        let orchestrator = orchestrator(&mock);
        let sink = CollectingSink::new();

        let reply = orchestrator
            .chat(
                &ChatRequest::new("c1", "analyze project"),
                Some(Arc::new(sink.clone())),
            )
            .await;

        assert!(reply.success);
        assert_eq!(reply.model, Some(Backend::Local));
        let text = reply.message.unwrap();
        assert!(text.starts_with(crate::analyzer::NO_FILES_FOUND));
        assert!(text.ends_with(FOLLOW_UP_HINT));
        assert!(sink.joined().ends_with(FOLLOW_UP_HINT));
        assert_eq!(orchestrator.store().len("c1"), 0);
        assert!(!orchestrator.sinks().is_bound("c1"));
    }

    #[tokio::test]
    async fn test_chat_streamed_emits_frames_then_reply() {
        let mock = MockBackend::new().add_stream(MockStream::tokens(&["Hel", "lo"]));
        let orchestrator = orchestrator(&mock);
        let (tx, rx) = mpsc::channel(16);

        let reply = orchestrator
            .chat_streamed(&ChatRequest::new("c1", "hello"), tx)
            .await;
        assert!(reply.success);

        let frames: Vec<StreamFrame> = tokio_stream_frames(rx).await;
        assert_eq!(
            frames,
            vec![
                StreamFrame::Message {
                    content: "Hel".to_string()
                },
                StreamFrame::Message {
                    content: "lo".to_string()
                },
                StreamFrame::Reply(ChatReply::success("c1", "Hello", Backend::Local)),
            ]
        );
    }

    async fn tokio_stream_frames(mut rx: mpsc::Receiver<StreamFrame>) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_analyze_code_missing_file() {
        let mock = MockBackend::new();
        let orchestrator = orchestrator(&mock);

        let reply = orchestrator.analyze_code("nope.py", None).await;
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("File not found"));
        assert!(mock.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_local_stream_mock_via_mockall() {
        let mut local = MockStreamingClient::new();
        local.expect_open_stream().times(1).returning(|_| {
            let lines = vec![
                Ok(r#"{"response":"from mockall","done":true}"#.to_string()),
            ];
            Ok(futures::stream::iter(lines).boxed())
        });
        let remote = MockCompletionClient::new();

        let orchestrator = ChatOrchestrator::new(
            &ServiceConfig::default(),
            Arc::new(local),
            Arc::new(remote),
        );
        let reply = orchestrator.chat(&ChatRequest::new("c9", "hello"), None).await;
        assert_eq!(reply.message.as_deref(), Some("from mockall"));
    }
}
