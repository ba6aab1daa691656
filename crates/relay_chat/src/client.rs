//! Model backend clients.
//!
//! Two transports are supported: a local model server that only answers as a
//! newline-delimited JSON token stream, and a hosted chat-completions API that
//! answers each request with one complete JSON body.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{LocalBackendConfig, RemoteBackendConfig};
use crate::error::{ChatError, ChatResult};
use crate::types::Message;

/// Raw NDJSON lines from a streaming backend, one decoded envelope per item.
pub type LineStream = Pin<Box<dyn Stream<Item = ChatResult<String>> + Send>>;

/// Backend that answers a raw prompt as an incremental stream.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamingClient: Send + Sync {
    /// Open a generation stream. Fails if the call cannot be established.
    async fn open_stream(&self, prompt: &str) -> ChatResult<LineStream>;
}

/// Backend that answers a structured message list with one complete reply.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> ChatResult<String>;
}

/// Decode one raw line. Blank lines yield nothing.
fn line_text(bytes: &[u8]) -> Option<ChatResult<String>> {
    match std::str::from_utf8(bytes) {
        Ok(text) => {
            let text = text.trim();
            (!text.is_empty()).then(|| Ok(text.to_string()))
        }
        Err(e) => Some(Err(ChatError::ChunkDecode(format!(
            "invalid UTF-8 in stream line: {}",
            e
        )))),
    }
}

/// Re-split an arbitrary byte stream on `\n`, dropping blank lines.
///
/// A line that is not valid UTF-8 is yielded as a recoverable
/// [`ChatError::ChunkDecode`] and the stream continues. A transport error ends
/// the stream after being yielded once.
pub fn split_lines<S, B, E>(chunks: S) -> LineStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ChatError> + Send + 'static,
{
    struct State<S> {
        chunks: S,
        buffer: Vec<u8>,
        finished: bool,
    }

    let state = State {
        chunks,
        buffer: Vec::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = st.buffer.drain(..=pos).collect();
                match line_text(&line) {
                    Some(item) => return Some((item, st)),
                    None => continue,
                }
            }

            if st.finished {
                let rest = std::mem::take(&mut st.buffer);
                return line_text(&rest).map(|item| (item, st));
            }

            match st.chunks.next().await {
                Some(Ok(bytes)) => st.buffer.extend_from_slice(bytes.as_ref()),
                Some(Err(e)) => {
                    st.finished = true;
                    st.buffer.clear();
                    return Some((Err(e.into()), st));
                }
                None => st.finished = true,
            }
        }
    })
    .boxed()
}

fn http_client(timeout_secs: u64, whole_request: bool) -> ChatResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if timeout_secs > 0 {
        let timeout = Duration::from_secs(timeout_secs);
        builder = if whole_request {
            builder.timeout(timeout)
        } else {
            builder.connect_timeout(timeout)
        };
    }
    builder
        .build()
        .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Backoff before retry `attempt` (1-based): 2s, 4s, ... at most 64s.
fn backoff_secs(attempt: u32) -> u64 {
    1u64 << attempt.min(6)
}

/// Local model server speaking the `/api/generate` streaming protocol.
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: &LocalBackendConfig) -> ChatResult<Self> {
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            // Generation can run for minutes; only bound the connect phase.
            client: http_client(config.timeout_secs, false)?,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl StreamingClient for OllamaClient {
    async fn open_stream(&self, prompt: &str) -> ChatResult<LineStream> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
        };

        debug!("Opening local stream to {} ({} prompt chars)", url, prompt.len());
        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::BackendBadResponse(format!(
                "Local model error {}: {}",
                status, body
            )));
        }

        Ok(split_lines(response.bytes_stream().boxed()))
    }
}

/// Hosted backend speaking the `/v1/chat/completions` protocol.
pub struct RemoteChatClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_attempts: u32,
    client: reqwest::Client,
}

impl RemoteChatClient {
    pub fn new(config: &RemoteBackendConfig) -> ChatResult<Self> {
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_attempts: config.max_attempts.max(1),
            client: http_client(config.timeout_secs, true)?,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl CompletionClient for RemoteChatClient {
    async fn complete(&self, messages: &[Message]) -> ChatResult<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ChatError::Config("Remote backend not configured. Set REMOTE_API_KEY".to_string())
        })?;
        let url = format!("{}/v1/chat/completions", self.base_url);

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
        };

        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                // Exponential backoff: 2s, 4s, ... capped at 64s
                let delay = Duration::from_secs(backoff_secs(attempt));
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Accept", "application/json")
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(
                        "Remote request failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.max_attempts,
                        e
                    );
                    last_error = Some(ChatError::from(e));
                    continue;
                }
            };

            let status = response.status();

            if status.is_server_error() || status.as_u16() == 429 {
                let body = response.text().await.unwrap_or_default();
                last_error = Some(ChatError::BackendBadResponse(format!(
                    "Remote API error {} (attempt {}/{}): {}",
                    status,
                    attempt + 1,
                    self.max_attempts,
                    body
                )));
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ChatError::BackendBadResponse(format!(
                    "Remote API error {}: {}",
                    status, body
                )));
            }

            let result: ChatCompletionResponse = response.json().await.map_err(|e| {
                ChatError::BackendBadResponse(format!("Failed to parse response: {}", e))
            })?;

            return result
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| {
                    ChatError::BackendBadResponse("No choices in remote response".to_string())
                });
        }

        Err(last_error.unwrap_or_else(|| {
            ChatError::BackendUnreachable("Max attempts exceeded".to_string())
        }))
    }
}

// Local generate API types
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

// Chat completions API types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: String,
}
