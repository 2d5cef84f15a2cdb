//! # msq
//!
//! `msq` is a durable, topic-based message exchange. Publishers append
//! messages to named topics; consumers read them through named channels,
//! each channel keeping its own persisted offset. Delivery is pull based and
//! at-least-once, with bounded retries for failing handlers and background
//! compaction of the prefix every channel has already consumed.
//!
//! ## Core Modules
//!
//! - `broker`: the `Exchange`, its `Topic`s, `Publisher`s and `Consumer`s.
//! - `persistence`: the per-topic logs (sled-backed or in-memory) and the
//!   topic-name registry.
//! - `config`: loading settings from `config/default` and the environment.
//! - `utils`: error types and logging setup.
//!
//! ```no_run
//! # async fn demo() -> msq::Result<()> {
//! use msq::{Exchange, Settings};
//!
//! let exchange = Exchange::open(&Settings::default())?;
//! exchange.run()?;
//!
//! let consumer = exchange.new_consumer("orders", "billing", |id, payload| {
//!     println!("{id}: {}", String::from_utf8_lossy(payload));
//!     Ok(())
//! })?;
//!
//! exchange.new_publisher()?.publish("orders", "hello")?;
//!
//! consumer.stop();
//! exchange.stop();
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod persistence;
pub mod utils;

pub use broker::{
    Consumer, ConsumerOptions, Exchange, Message, MessageId, Publisher, RetryPolicy,
    StartPosition, Topic, TopicMetrics,
};
pub use config::Settings;
pub use utils::error::{BrokerError, DeliveryFailure, HandlerError, Result, StorageError};
