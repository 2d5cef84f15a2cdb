//! The `error` module defines the error types shared by the exchange, its
//! topics and the storage layer.
//!
//! `BrokerError` is what every public operation returns. Storage problems are
//! kept in their own `StorageError` so callers can tell a failing log apart
//! from a stopped exchange or an unknown topic.

use thiserror::Error;

use crate::broker::message::MessageId;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Error a message handler may return. Any error type can be boxed into it.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The owning exchange or topic is not running.
    #[error("stopped")]
    Stopped,

    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("consumer loop panicked: {0}")]
    ConsumerPanicked(String),
}

impl BrokerError {
    pub fn is_stopped(&self) -> bool {
        matches!(self, BrokerError::Stopped)
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("corrupt message id {0:?}")]
    CorruptId(String),

    #[error("transaction aborted: {0}")]
    Transaction(String),
}

impl From<sled::Error> for BrokerError {
    fn from(err: sled::Error) -> Self {
        BrokerError::Storage(StorageError::Sled(err))
    }
}

impl From<sled::transaction::TransactionError<()>> for StorageError {
    fn from(err: sled::transaction::TransactionError<()>) -> Self {
        match err {
            sled::transaction::TransactionError::Storage(e) => StorageError::Sled(e),
            sled::transaction::TransactionError::Abort(()) => {
                StorageError::Transaction("aborted".to_string())
            }
        }
    }
}

/// Reported on a consumer's failure channel when a handler kept failing
/// after every retry. The message has still been marked read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub topic: String,
    pub channel: String,
    pub id: MessageId,
    pub attempts: u32,
    pub error: String,
}

impl std::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}: message {} failed after {} attempts: {}",
            self.topic, self.channel, self.id, self.attempts, self.error
        )
    }
}
