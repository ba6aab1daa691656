//! Live progress delivery.
//!
//! A [`ProgressSink`] receives partial output strings while a call runs.
//! Delivery never blocks the producer: a full or closed queue is reported
//! as a recoverable [`ChatError::SinkDelivery`] and the chunk is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ChatError, ChatResult};
use crate::types::{ConversationId, StreamFrame};

/// Somewhere to send live partial output for one conversation.
pub trait ProgressSink: Send + Sync {
    /// Hand over one chunk without waiting.
    fn deliver(&self, chunk: &str) -> ChatResult<()>;
}

/// Sink backed by a bounded frame queue, typically drained by a connection writer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<StreamFrame>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<StreamFrame>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl ProgressSink for ChannelSink {
    fn deliver(&self, chunk: &str) -> ChatResult<()> {
        self.tx
            .try_send(StreamFrame::Message {
                content: chunk.to_string(),
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    ChatError::SinkDelivery("listener queue is full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    ChatError::SinkDelivery("listener has gone away".to_string())
                }
            })
    }
}

/// Sink that stores every chunk in memory.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    chunks: Arc<Mutex<Vec<String>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> Vec<String> {
        self.chunks.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }

    pub fn joined(&self) -> String {
        self.chunks.lock().concat()
    }
}

impl ProgressSink for CollectingSink {
    fn deliver(&self, chunk: &str) -> ChatResult<()> {
        self.chunks.lock().push(chunk.to_string());
        Ok(())
    }
}

struct Registration {
    generation: u64,
    sink: Arc<dyn ProgressSink>,
}

/// Process-wide table of the sink currently bound to each conversation.
///
/// At most one sink is live per conversation. Binding returns a
/// [`SinkBinding`] guard which releases the registration when dropped.
#[derive(Default)]
pub struct SinkRegistry {
    bindings: Mutex<HashMap<ConversationId, Registration>>,
    next_generation: AtomicU64,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `sink` to a conversation, superseding any earlier binding.
    pub fn bind(
        self: &Arc<Self>,
        conversation_id: impl Into<ConversationId>,
        sink: Arc<dyn ProgressSink>,
    ) -> SinkBinding {
        let conversation_id = conversation_id.into();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .bindings
            .lock()
            .insert(conversation_id.clone(), Registration { generation, sink });
        if previous.is_some() {
            debug!("Sink for conversation {} superseded", conversation_id);
        }

        SinkBinding {
            registry: Arc::clone(self),
            conversation_id,
            generation,
        }
    }

    pub fn is_bound(&self, conversation_id: &str) -> bool {
        self.bindings.lock().contains_key(conversation_id)
    }

    pub fn bound_count(&self) -> usize {
        self.bindings.lock().len()
    }

    /// Delivery happens under the table lock so a concurrent `bind` cannot
    /// slip in between the generation check and the send. Sinks never block.
    fn deliver(&self, conversation_id: &str, generation: u64, chunk: &str) -> ChatResult<()> {
        let bindings = self.bindings.lock();
        match bindings.get(conversation_id) {
            Some(reg) if reg.generation == generation => reg.sink.deliver(chunk),
            _ => Err(ChatError::SinkDelivery(format!(
                "no live sink for conversation {}",
                conversation_id
            ))),
        }
    }

    fn release(&self, conversation_id: &str, generation: u64) {
        let mut bindings = self.bindings.lock();
        if bindings
            .get(conversation_id)
            .is_some_and(|reg| reg.generation == generation)
        {
            bindings.remove(conversation_id);
        }
    }
}

/// Scoped registration of a sink; unbinds on drop.
pub struct SinkBinding {
    registry: Arc<SinkRegistry>,
    conversation_id: ConversationId,
    generation: u64,
}

impl SinkBinding {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

impl ProgressSink for SinkBinding {
    fn deliver(&self, chunk: &str) -> ChatResult<()> {
        self.registry
            .deliver(&self.conversation_id, self.generation, chunk)
    }
}

impl Drop for SinkBinding {
    fn drop(&mut self) {
        self.registry.release(&self.conversation_id, self.generation);
    }
}
