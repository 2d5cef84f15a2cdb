//! The exchange and everything that hangs off it: topics, consumers,
//! publishers and the message record.

pub mod consumer;
pub mod exchange;
pub mod message;
pub mod publisher;
pub mod topic;

pub use consumer::{Consumer, ConsumerOptions, MessageHandler, RetryPolicy};
pub use exchange::Exchange;
pub use message::{Message, MessageId};
pub use publisher::Publisher;
pub use topic::{StartPosition, Topic, TopicMetrics, TopicStatus};
