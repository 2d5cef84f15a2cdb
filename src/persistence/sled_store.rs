//! Persistence layer backed by `sled`
//!
//! One `sled::Db` per exchange. Each durable topic gets two trees:
//! - `<topic>/messages`: key = `MessageId` bytes, value = JSON `StoredMessage`
//! - `<topic>/channels`: key = channel name, value = last-read `MessageId`
//!
//! Ids are fixed-width decimal strings, so sled's byte ordering is the
//! topic's append ordering and range scans need no decoding of the key.
//!
//! The `__msq_topics` tree records the names of durable topics together with
//! their creation time (big-endian milliseconds).

use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, Transactional};
use sled::{Batch, Db, IVec, Tree};
use tracing::debug;

use super::TopicLog;
use crate::broker::message::{Message, MessageId, StoredMessage};
use crate::config::StorageSettings;
use crate::utils::error::StorageError;

const TOPICS_TREE: &str = "__msq_topics";

#[derive(Clone)]
pub struct Persistence {
    db: Db,
    topics: Tree,
}

impl Persistence {
    /// Open or create the sled database described by `settings`.
    pub fn open(settings: &StorageSettings) -> Result<Self, StorageError> {
        let config = if settings.temporary {
            sled::Config::new().temporary(true)
        } else {
            sled::Config::new().path(&settings.path)
        };
        let db = config.open()?;
        let topics = db.open_tree(TOPICS_TREE)?;
        debug!(path = %settings.path, temporary = settings.temporary, "opened sled database");
        Ok(Self { db, topics })
    }

    /// Names of every durable topic ever created, in byte order.
    pub fn list_topic_names(&self) -> Result<Vec<String>, StorageError> {
        self.topics
            .iter()
            .keys()
            .map(|key| -> Result<String, StorageError> {
                let key = key?;
                Ok(String::from_utf8_lossy(&key).into_owned())
            })
            .collect()
    }

    /// Record a topic name. Returns `false` if it was already registered.
    pub fn insert_topic_name(&self, name: &str) -> Result<bool, StorageError> {
        let created = Utc::now().timestamp_millis().to_be_bytes().to_vec();
        let swapped = self
            .topics
            .compare_and_swap(name.as_bytes(), None::<&[u8]>, Some(created))?;
        Ok(swapped.is_ok())
    }

    pub fn open_topic_log(&self, name: &str) -> Result<SledLog, StorageError> {
        Ok(SledLog {
            messages: self.db.open_tree(format!("{name}/messages"))?,
            channels: self.db.open_tree(format!("{name}/channels"))?,
        })
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("db", &"sled::Db")
            .finish()
    }
}

/// Durable `TopicLog` stored in two sled trees.
pub struct SledLog {
    messages: Tree,
    channels: Tree,
}

impl SledLog {
    fn decode(key: IVec, value: IVec) -> Result<Message, StorageError> {
        let id = MessageId::from_bytes(&key)?;
        let stored: StoredMessage = serde_json::from_slice(&value)?;
        Ok(Message::from_stored(id, stored))
    }

    fn offsets(&self) -> impl Iterator<Item = Result<MessageId, StorageError>> + '_ {
        self.channels.iter().values().map(|value| -> Result<MessageId, StorageError> {
            let value = value?;
            MessageId::from_bytes(&value)
        })
    }
}

impl TopicLog for SledLog {
    fn append(&self, message: &Message) -> Result<(), StorageError> {
        let body = serde_json::to_vec(&message.to_stored())?;
        self.messages.insert(message.id.as_bytes(), body)?;
        Ok(())
    }

    fn next_after(&self, after: &MessageId) -> Result<Option<Message>, StorageError> {
        match self.messages.get_gt(after.as_bytes())? {
            Some((key, value)) => Ok(Some(Self::decode(key, value)?)),
            None => Ok(None),
        }
    }

    fn last_id(&self) -> Result<Option<MessageId>, StorageError> {
        match self.messages.last()? {
            Some((key, _)) => Ok(Some(MessageId::from_bytes(&key)?)),
            None => Ok(None),
        }
    }

    fn offset(&self, channel: &str) -> Result<Option<MessageId>, StorageError> {
        match self.channels.get(channel.as_bytes())? {
            Some(value) => Ok(Some(MessageId::from_bytes(&value)?)),
            None => Ok(None),
        }
    }

    fn upsert_offset(&self, channel: &str, id: &MessageId) -> Result<(), StorageError> {
        self.channels.insert(channel.as_bytes(), id.as_bytes())?;
        Ok(())
    }

    fn min_offset(&self) -> Result<Option<MessageId>, StorageError> {
        let mut min: Option<MessageId> = None;
        for offset in self.offsets() {
            let offset = offset?;
            if min.as_ref().is_none_or(|m| offset < *m) {
                min = Some(offset);
            }
        }
        Ok(min)
    }

    fn max_offset(&self) -> Result<Option<MessageId>, StorageError> {
        let mut max: Option<MessageId> = None;
        for offset in self.offsets() {
            let offset = offset?;
            if max.as_ref().is_none_or(|m| offset > *m) {
                max = Some(offset);
            }
        }
        Ok(max)
    }

    fn delete_up_to(&self, id: &MessageId) -> Result<usize, StorageError> {
        let mut batch = Batch::default();
        let mut removed = 0;
        for key in self.messages.range(..=id.as_bytes()).keys() {
            batch.remove(key?);
            removed += 1;
        }
        if removed > 0 {
            self.messages.apply_batch(batch)?;
        }
        Ok(removed)
    }

    fn message_count(&self) -> Result<u64, StorageError> {
        Ok(self.messages.len() as u64)
    }

    fn channel_count(&self) -> Result<u64, StorageError> {
        Ok(self.channels.len() as u64)
    }

    fn clear(&self) -> Result<(), StorageError> {
        let message_keys = self.messages.iter().keys().collect::<Result<Vec<_>, _>>()?;
        let channel_keys = self.channels.iter().keys().collect::<Result<Vec<_>, _>>()?;

        (&self.messages, &self.channels).transaction(|(messages, channels)| {
            for key in &message_keys {
                messages.remove(key.clone())?;
            }
            for key in &channel_keys {
                channels.remove(key.clone())?;
            }
            Ok::<(), ConflictableTransactionError<()>>(())
        })?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.messages.flush()?;
        self.channels.flush()?;
        Ok(())
    }
}
