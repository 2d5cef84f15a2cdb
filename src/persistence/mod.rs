//! The `persistence` module provides the ordered logs topics are stored in.
//!
//! Every topic owns one `TopicLog`: an ordered message store keyed by
//! `MessageId` plus a table of channel offsets. Durable topics use
//! [`SledLog`], two trees inside the exchange's `sled` database; ephemeral
//! topics use [`MemoryLog`] and vanish with the process.
//!
//! [`Persistence`] owns the database itself and the registry of topic names
//! the exchange restores on restart.

pub mod memory;
pub mod sled_store;

pub use memory::MemoryLog;
pub use sled_store::{Persistence, SledLog};

use crate::broker::message::{Message, MessageId};
use crate::utils::error::StorageError;

/// Storage contract for a single topic.
///
/// Implementations do their own internal synchronisation, but the topic
/// serialises every mutating call behind its lock, so `clear` and
/// `delete_up_to` only need to be atomic with respect to crashes.
pub trait TopicLog: Send + Sync {
    fn append(&self, message: &Message) -> Result<(), StorageError>;

    /// Smallest message with an id strictly greater than `after`.
    fn next_after(&self, after: &MessageId) -> Result<Option<Message>, StorageError>;

    /// Highest id currently stored.
    fn last_id(&self) -> Result<Option<MessageId>, StorageError>;

    fn offset(&self, channel: &str) -> Result<Option<MessageId>, StorageError>;

    fn upsert_offset(&self, channel: &str, id: &MessageId) -> Result<(), StorageError>;

    /// Offset of the slowest channel, `None` without channels.
    fn min_offset(&self) -> Result<Option<MessageId>, StorageError>;

    fn max_offset(&self) -> Result<Option<MessageId>, StorageError>;

    /// Remove every message with id `<= id` in one atomic step. Returns how
    /// many were removed.
    fn delete_up_to(&self, id: &MessageId) -> Result<usize, StorageError>;

    fn message_count(&self) -> Result<u64, StorageError>;

    fn channel_count(&self) -> Result<u64, StorageError>;

    /// Remove all messages and all channel offsets in one atomic step.
    fn clear(&self) -> Result<(), StorageError>;

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
