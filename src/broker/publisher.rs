use crate::broker::exchange::Exchange;
use crate::broker::message::MessageId;
use crate::utils::error::Result;

/// Appends messages to topics of one exchange, resolving topics by name.
///
/// By default an unknown topic is created on first publish.
#[derive(Debug, Clone)]
pub struct Publisher {
    exchange: Exchange,
    create_topics: bool,
}

impl Publisher {
    pub(crate) fn new(exchange: Exchange) -> Self {
        Self {
            exchange,
            create_topics: true,
        }
    }

    /// Publishing to an unknown topic fails with `TopicNotFound` instead of
    /// creating it.
    pub fn without_auto_create(mut self) -> Self {
        self.create_topics = false;
        self
    }

    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<MessageId> {
        let topic = if self.create_topics {
            self.exchange.ensure_topic(topic)?
        } else {
            self.exchange.get_topic(topic)?
        };
        topic.send(payload)
    }
}
