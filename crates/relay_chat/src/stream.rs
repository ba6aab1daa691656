//! Streaming aggregation.
//!
//! Drives a [`StreamingClient`], forwarding each text fragment to an optional
//! [`ProgressSink`] while concatenating the fragments into the final answer.
//!
//! A mid-stream transport failure returns the error and discards the text
//! accumulated so far. Fragments already forwarded to the sink are not
//! recalled, so a listener may have seen text that never becomes a reply.

use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::StreamingClient;
use crate::error::{ChatError, ChatResult};
use crate::sink::ProgressSink;

/// One decoded envelope of the local generation stream.
#[derive(Debug, Deserialize, PartialEq)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
    /// Backend-reported failure; ends the stream
    #[serde(default)]
    pub error: Option<String>,
}

/// Decode a single NDJSON line.
pub fn decode_chunk(line: &str) -> ChatResult<GenerateChunk> {
    serde_json::from_str(line).map_err(|e| ChatError::ChunkDecode(format!("{}: {}", e, line)))
}

/// Counters for the recoverable events of one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Fragments appended to the answer
    pub chunks: usize,
    /// Lines skipped because they did not decode
    pub decode_errors: usize,
    /// Fragments the sink refused
    pub dropped_deliveries: usize,
}

impl StreamStats {
    pub fn merge(&mut self, other: &StreamStats) {
        self.chunks += other.chunks;
        self.decode_errors += other.decode_errors;
        self.dropped_deliveries += other.dropped_deliveries;
    }
}

/// Completed stream: the full answer plus what was absorbed along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutput {
    pub text: String,
    pub stats: StreamStats,
}

/// Forward a chunk to the sink if one is attached; failures are logged and counted.
pub(crate) fn forward(sink: Option<&dyn ProgressSink>, chunk: &str, stats: &mut StreamStats) {
    if let Some(sink) = sink {
        if let Err(e) = sink.deliver(chunk) {
            stats.dropped_deliveries += 1;
            warn!("Dropping progress chunk: {}", e);
        }
    }
}

/// Run one prompt through a streaming backend and return the concatenated answer.
pub async fn run_streaming(
    client: &dyn StreamingClient,
    prompt: &str,
    sink: Option<&dyn ProgressSink>,
) -> ChatResult<StreamOutput> {
    let mut lines = client.open_stream(prompt).await?;
    let mut text = String::new();
    let mut stats = StreamStats::default();

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) if e.is_recoverable() => {
                stats.decode_errors += 1;
                warn!("Skipping undecodable line: {}", e);
                continue;
            }
            Err(e) => {
                warn!(
                    "Stream failed after {} chunks, discarding {} partial chars: {}",
                    stats.chunks,
                    text.len(),
                    e
                );
                return Err(e);
            }
        };

        let chunk = match decode_chunk(&line) {
            Ok(chunk) => chunk,
            Err(e) => {
                stats.decode_errors += 1;
                warn!("Skipping undecodable chunk: {}", e);
                continue;
            }
        };

        if let Some(error) = chunk.error {
            return Err(ChatError::BackendBadResponse(error));
        }

        if let Some(fragment) = chunk.response.filter(|f| !f.is_empty()) {
            stats.chunks += 1;
            text.push_str(&fragment);
            forward(sink, &fragment, &mut stats);
        }

        if chunk.done {
            break;
        }
    }

    debug!(
        "Stream complete: {} chunks, {} decode errors, {} dropped deliveries",
        stats.chunks, stats.decode_errors, stats.dropped_deliveries
    );

    Ok(StreamOutput { text, stats })
}
