use std::collections::VecDeque;

use chatwarden_core::Identity;
use chatwarden_llm::ChatMessage;
use dashmap::DashMap;

/// Per-identity bounded message history.
///
/// Holds everything except the system prompt, which is re-prepended fresh
/// each turn from current configuration. Conversations are created lazily,
/// trimmed oldest-first to `2 * max_exchanges` entries, and never persisted.
///
/// Each map entry is its own unit of atomicity: `append_exchange` performs
/// the append-both-then-trim step under one entry lock. Concurrent turns for
/// the same identity may still interleave around the network call - last
/// writer wins on ordering, which is accepted; holding a lock across the
/// provider's latency is not.
#[derive(Default)]
pub struct ConversationStore {
    conversations: DashMap<Identity, VecDeque<ChatMessage>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordered copy of the stored history, oldest first.
    pub fn snapshot(&self, identity: Identity) -> Vec<ChatMessage> {
        self.conversations
            .get(&identity)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn append(&self, identity: Identity, message: ChatMessage) {
        self.conversations.entry(identity).or_default().push_back(message);
    }

    /// Append one user+assistant pair and trim, as a single atomic step.
    pub fn append_exchange(
        &self,
        identity: Identity,
        user: ChatMessage,
        assistant: ChatMessage,
        max_exchanges: usize,
    ) {
        let mut history = self.conversations.entry(identity).or_default();
        history.push_back(user);
        history.push_back(assistant);
        trim_oldest(&mut history, max_exchanges);
    }

    /// Evict from the head until at most `2 * max_exchanges` entries remain.
    pub fn trim(&self, identity: Identity, max_exchanges: usize) {
        if let Some(mut history) = self.conversations.get_mut(&identity) {
            trim_oldest(&mut history, max_exchanges);
        }
    }

    pub fn clear(&self, identity: Identity) {
        self.conversations.remove(&identity);
    }

    pub fn len(&self, identity: Identity) -> usize {
        self.conversations.get(&identity).map(|history| history.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, identity: Identity) -> bool {
        self.len(identity) == 0
    }
}

fn trim_oldest(history: &mut VecDeque<ChatMessage>, max_exchanges: usize) {
    while history.len() > max_exchanges * 2 {
        history.pop_front();
    }
}
