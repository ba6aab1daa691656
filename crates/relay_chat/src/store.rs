//! In-memory conversation histories.
//!
//! The map lock is only held long enough to find or create a conversation's
//! entry; each conversation then has its own lock, so exchanges on distinct
//! conversations never contend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{ConversationId, Message};

type History = Arc<Mutex<Vec<Message>>>;

/// Process-wide mapping from conversation id to ordered message history.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: Mutex<HashMap<ConversationId, History>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or lazily create the history for a conversation.
    fn entry(&self, conversation_id: &str) -> History {
        let mut map = self.conversations.lock();
        map.entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Make sure a (possibly empty) history exists. Idempotent.
    pub fn ensure(&self, conversation_id: &str) {
        self.entry(conversation_id);
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.conversations.lock().contains_key(conversation_id)
    }

    /// Snapshot of the history, oldest first.
    pub fn history(&self, conversation_id: &str) -> Vec<Message> {
        self.entry(conversation_id).lock().clone()
    }

    /// Append a completed user/assistant pair under the conversation's lock.
    pub fn append_exchange(&self, conversation_id: &str, user: Message, assistant: Message) {
        let history = self.entry(conversation_id);
        let mut messages = history.lock();
        messages.push(user);
        messages.push(assistant);
    }

    pub fn len(&self, conversation_id: &str) -> usize {
        self.conversations
            .lock()
            .get(conversation_id)
            .map(|h| h.lock().len())
            .unwrap_or(0)
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageRole;

    #[test]
    fn test_ensure_is_idempotent() {
        let store = ConversationStore::new();
        assert!(!store.contains("c1"));

        store.ensure("c1");
        store.append_exchange("c1", Message::user("hi"), Message::assistant("hello"));
        store.ensure("c1");

        assert_eq!(store.len("c1"), 2);
        assert_eq!(store.conversation_count(), 1);
    }

    #[test]
    fn test_exchange_order() {
        let store = ConversationStore::new();
        store.append_exchange("c1", Message::user("hi"), Message::assistant("r1"));
        store.append_exchange("c1", Message::user("how are you"), Message::assistant("r2"));

        let history = store.history("c1");
        let flat: Vec<_> = history
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            flat,
            vec![
                (MessageRole::User, "hi"),
                (MessageRole::Assistant, "r1"),
                (MessageRole::User, "how are you"),
                (MessageRole::Assistant, "r2"),
            ]
        );
    }

    #[test]
    fn test_conversations_are_isolated() {
        let store = ConversationStore::new();
        store.append_exchange("a", Message::user("1"), Message::assistant("2"));
        assert_eq!(store.len("a"), 2);
        assert_eq!(store.len("b"), 0);
        assert!(store.history("b").is_empty());
    }

    #[test]
    fn test_concurrent_pairs_never_interleave() {
        let store = Arc::new(ConversationStore::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.append_exchange(
                        "shared",
                        Message::user(format!("q{}", i)),
                        Message::assistant(format!("a{}", i)),
                    );
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let history = store.history("shared");
        assert_eq!(history.len(), 32);
        for pair in history.chunks(2) {
            assert_eq!(pair[0].role, MessageRole::User);
            assert_eq!(pair[1].role, MessageRole::Assistant);
            assert_eq!(pair[0].content[1..], pair[1].content[1..]);
        }
    }
}
