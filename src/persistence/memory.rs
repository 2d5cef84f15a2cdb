use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use parking_lot::Mutex;

use super::TopicLog;
use crate::broker::message::{Message, MessageId, StoredMessage};
use crate::utils::error::StorageError;

/// In-memory `TopicLog` for ephemeral topics. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryLog {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    messages: BTreeMap<MessageId, StoredMessage>,
    offsets: HashMap<String, MessageId>,
}

impl TopicLog for MemoryLog {
    fn append(&self, message: &Message) -> Result<(), StorageError> {
        self.inner
            .lock()
            .messages
            .insert(message.id.clone(), message.to_stored());
        Ok(())
    }

    fn next_after(&self, after: &MessageId) -> Result<Option<Message>, StorageError> {
        let state = self.inner.lock();
        let next = state
            .messages
            .range((Bound::Excluded(after), Bound::Unbounded))
            .next()
            .map(|(id, stored)| Message::from_stored(id.clone(), stored.clone()));
        Ok(next)
    }

    fn last_id(&self) -> Result<Option<MessageId>, StorageError> {
        Ok(self.inner.lock().messages.keys().next_back().cloned())
    }

    fn offset(&self, channel: &str) -> Result<Option<MessageId>, StorageError> {
        Ok(self.inner.lock().offsets.get(channel).cloned())
    }

    fn upsert_offset(&self, channel: &str, id: &MessageId) -> Result<(), StorageError> {
        self.inner
            .lock()
            .offsets
            .insert(channel.to_string(), id.clone());
        Ok(())
    }

    fn min_offset(&self) -> Result<Option<MessageId>, StorageError> {
        Ok(self.inner.lock().offsets.values().min().cloned())
    }

    fn max_offset(&self) -> Result<Option<MessageId>, StorageError> {
        Ok(self.inner.lock().offsets.values().max().cloned())
    }

    fn delete_up_to(&self, id: &MessageId) -> Result<usize, StorageError> {
        let mut state = self.inner.lock();
        let retained = match id.millis().checked_add(1) {
            Some(next) => state.messages.split_off(&MessageId::from_millis(next)),
            None => BTreeMap::new(),
        };
        let removed = state.messages.len();
        state.messages = retained;
        Ok(removed)
    }

    fn message_count(&self) -> Result<u64, StorageError> {
        Ok(self.inner.lock().messages.len() as u64)
    }

    fn channel_count(&self) -> Result<u64, StorageError> {
        Ok(self.inner.lock().offsets.len() as u64)
    }

    fn clear(&self) -> Result<(), StorageError> {
        let mut state = self.inner.lock();
        state.messages.clear();
        state.offsets.clear();
        Ok(())
    }
}
