//! Message definitions for the exchange
//!
//! `Message` is the record a topic stores and a consumer receives. Its id is
//! a `MessageId`: the wall-clock milliseconds of the append, zero-padded to a
//! fixed width so that byte order, string order and append order agree.
//!
//! Notes on fields:
//! - `id`: unique within the topic, strictly increasing in append order
//! - `timestamp`: milliseconds since UNIX epoch at the time of the append
//! - `payload`: opaque bytes, never inspected by the exchange

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::error::StorageError;

/// Number of decimal digits in an encoded id.
pub const ID_WIDTH: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct MessageId(String);

impl MessageId {
    pub fn from_millis(millis: u64) -> Self {
        MessageId(format!("{millis:0width$}", width = ID_WIDTH))
    }

    /// The id every generated id sorts after. Used as the offset of a
    /// channel that has not consumed anything yet.
    pub fn zero() -> Self {
        Self::from_millis(0)
    }

    /// The id to assign to a message appended at `now_ms`, given the last id
    /// handed out by the topic. Never returns an id `<= last` while `last`
    /// is below `u64::MAX` milliseconds.
    pub fn next(now_ms: i64, last: Option<&MessageId>) -> Self {
        let now = u64::try_from(now_ms).unwrap_or(0);
        match last.map(MessageId::millis) {
            Some(prev) if now <= prev => Self::from_millis(prev.saturating_add(1)),
            _ => Self::from_millis(now),
        }
    }

    pub fn millis(&self) -> u64 {
        // every constructor guarantees the digits fit in a u64
        self.0.parse().unwrap_or(u64::MAX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Decode an id read back from storage.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| StorageError::CorruptId(String::from_utf8_lossy(bytes).into_owned()))?;
        Self::parse(text)
    }

    pub fn parse(text: &str) -> Result<Self, StorageError> {
        if text.len() != ID_WIDTH || !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StorageError::CorruptId(text.to_string()));
        }
        // 24 digits hold more than a u64; anything past it is not an id we made
        let millis: u64 = text
            .parse()
            .map_err(|_| StorageError::CorruptId(text.to_string()))?;
        Ok(Self::from_millis(millis))
    }
}

impl TryFrom<String> for MessageId {
    type Error = StorageError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Self::parse(&text)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for MessageId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub timestamp: i64,
    pub payload: Vec<u8>,
}

/// On-disk body of a message; the id is the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredMessage {
    pub timestamp: i64,
    pub payload: Vec<u8>,
}

impl Message {
    pub(crate) fn to_stored(&self) -> StoredMessage {
        StoredMessage {
            timestamp: self.timestamp,
            payload: self.payload.clone(),
        }
    }

    pub(crate) fn from_stored(id: MessageId, stored: StoredMessage) -> Self {
        Message {
            id,
            timestamp: stored.timestamp,
            payload: stored.payload,
        }
    }
}
