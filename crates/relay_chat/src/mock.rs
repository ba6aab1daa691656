//! Scripted in-memory backend for testing.
//!
//! Provides a configurable implementation of both client traits so the
//! dispatch engine can be exercised without a model server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;

use crate::client::{CompletionClient, LineStream, StreamingClient};
use crate::error::{ChatError, ChatResult};
use crate::types::Message;

/// One scripted item of a mock generation stream.
#[derive(Debug, Clone)]
pub enum MockLine {
    /// Raw NDJSON line, yielded verbatim
    Raw(String),
    /// Mid-stream transport failure
    Fail(String),
    /// Pause before the next item
    Delay(Duration),
    /// Never yield again
    Hang,
}

impl MockLine {
    /// A well-formed token envelope.
    pub fn token(text: &str) -> Self {
        Self::Raw(serde_json::json!({ "response": text, "done": false }).to_string())
    }

    /// The completion marker.
    pub fn done() -> Self {
        Self::Raw(serde_json::json!({ "response": "", "done": true }).to_string())
    }
}

/// Predefined behaviour for one `open_stream` call.
#[derive(Debug, Clone)]
pub enum MockStream {
    Lines(Vec<MockLine>),
    /// Fail to establish the stream
    Unreachable(String),
}

impl MockStream {
    /// Stream the given tokens followed by a completion marker.
    pub fn tokens(tokens: &[&str]) -> Self {
        let mut lines: Vec<MockLine> = tokens.iter().map(|t| MockLine::token(t)).collect();
        lines.push(MockLine::done());
        Self::Lines(lines)
    }

    pub fn lines(lines: Vec<MockLine>) -> Self {
        Self::Lines(lines)
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable(message.into())
    }
}

/// Fallback when no stream script is queued.
#[derive(Debug, Clone)]
enum Fallback {
    /// Fixed tokens
    Tokens(Vec<String>),
    /// Answer `re: <last prompt line>`
    Echo,
}

/// Counts dropped streams so tests can observe prompt closure.
struct CloseGuard(Arc<AtomicUsize>);

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mock model backend.
///
/// Captures every prompt and message list, and replays queued scripts in
/// order. When the queues run dry a default answer is produced.
#[derive(Clone)]
pub struct MockBackend {
    streams: Arc<RwLock<VecDeque<MockStream>>>,
    completions: Arc<RwLock<VecDeque<ChatResult<String>>>>,
    fallback: Arc<RwLock<Fallback>>,
    prompts: Arc<RwLock<Vec<String>>>,
    completion_calls: Arc<RwLock<Vec<Vec<Message>>>>,
    closed_streams: Arc<AtomicUsize>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            streams: Arc::new(RwLock::new(VecDeque::new())),
            completions: Arc::new(RwLock::new(VecDeque::new())),
            fallback: Arc::new(RwLock::new(Fallback::Tokens(vec!["mock reply".to_string()]))),
            prompts: Arc::new(RwLock::new(Vec::new())),
            completion_calls: Arc::new(RwLock::new(Vec::new())),
            closed_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer unscripted streams with `re: <last prompt line>`.
    pub fn echo(self) -> Self {
        *self.fallback.write() = Fallback::Echo;
        self
    }

    /// Queue a stream script for the next `open_stream` call.
    pub fn add_stream(self, stream: MockStream) -> Self {
        self.streams.write().push_back(stream);
        self
    }

    /// Queue a successful completion.
    pub fn add_completion(self, content: impl Into<String>) -> Self {
        self.completions.write().push_back(Ok(content.into()));
        self
    }

    /// Queue a failed completion.
    pub fn add_completion_error(self, error: ChatError) -> Self {
        self.completions.write().push_back(Err(error));
        self
    }

    /// Every prompt passed to `open_stream`, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.read().clone()
    }

    /// Every message list passed to `complete`, in call order.
    pub fn completion_calls(&self) -> Vec<Vec<Message>> {
        self.completion_calls.read().clone()
    }

    /// Number of streams that have been dropped by their consumer.
    pub fn closed_streams(&self) -> usize {
        self.closed_streams.load(Ordering::SeqCst)
    }

    fn next_stream(&self, prompt: &str) -> MockStream {
        if let Some(script) = self.streams.write().pop_front() {
            return script;
        }
        match &*self.fallback.read() {
            Fallback::Tokens(tokens) => {
                let refs: Vec<&str> = tokens.iter().map(|t| t.as_str()).collect();
                MockStream::tokens(&refs)
            }
            Fallback::Echo => {
                let last = prompt.lines().last().unwrap_or_default();
                let reply = format!("re: {}", last);
                MockStream::tokens(&[reply.as_str()])
            }
        }
    }
}

#[async_trait]
impl StreamingClient for MockBackend {
    async fn open_stream(&self, prompt: &str) -> ChatResult<LineStream> {
        self.prompts.write().push(prompt.to_string());

        let lines = match self.next_stream(prompt) {
            MockStream::Unreachable(message) => {
                return Err(ChatError::BackendUnreachable(message));
            }
            MockStream::Lines(lines) => lines,
        };

        let state = (
            VecDeque::from(lines),
            CloseGuard(Arc::clone(&self.closed_streams)),
        );
        let stream = futures::stream::unfold(state, |(mut queue, guard)| async move {
            loop {
                match queue.pop_front()? {
                    MockLine::Raw(line) => return Some((Ok(line), (queue, guard))),
                    MockLine::Fail(message) => {
                        queue.clear();
                        return Some((Err(ChatError::BackendUnreachable(message)), (queue, guard)));
                    }
                    MockLine::Delay(duration) => tokio::time::sleep(duration).await,
                    MockLine::Hang => futures::future::pending::<()>().await,
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[async_trait]
impl CompletionClient for MockBackend {
    async fn complete(&self, messages: &[Message]) -> ChatResult<String> {
        self.completion_calls.write().push(messages.to_vec());
        self.completions
            .write()
            .pop_front()
            .unwrap_or_else(|| Ok("mock completion".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_streams_replay_in_order() {
        let mock = MockBackend::new()
            .add_stream(MockStream::tokens(&["a"]))
            .add_stream(MockStream::unreachable("down"));

        let lines: Vec<_> = mock.open_stream("p1").await.unwrap().collect().await;
        assert_eq!(lines.len(), 2);

        assert!(mock.open_stream("p2").await.is_err());
        assert_eq!(mock.prompts(), vec!["p1".to_string(), "p2".to_string()]);
    }

    #[tokio::test]
    async fn test_close_counter() {
        let mock = MockBackend::new();
        let stream = mock.open_stream("p").await.unwrap();
        assert_eq!(mock.closed_streams(), 0);
        drop(stream);
        assert_eq!(mock.closed_streams(), 1);
    }

    #[tokio::test]
    async fn test_completion_queue_and_default() {
        let mock = MockBackend::new().add_completion("first");
        assert_eq!(mock.complete(&[Message::user("x")]).await.unwrap(), "first");
        assert_eq!(
            mock.complete(&[Message::user("y")]).await.unwrap(),
            "mock completion"
        );
        assert_eq!(mock.completion_calls().len(), 2);
    }
}
