//! Consumer loop
//!
//! A `Consumer` drives one (topic, channel) pair: it pulls the next message,
//! hands it to the handler with bounded exponential backoff between failed
//! attempts, then advances the channel offset.
//!
//! Delivery is at-least-once. A message is marked read only after the
//! handler succeeded or ran out of attempts; a consumer stopped in between
//! leaves the offset untouched and the message is redelivered later.
//! A handler that keeps failing does not hold the channel hostage: the
//! failure is logged, broadcast on the consumer's failure channel, and the
//! message is marked read anyway.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::message::{Message, MessageId};
use crate::broker::topic::{StartPosition, Topic};
use crate::config::ExchangeSettings;
use crate::utils::error::{BrokerError, DeliveryFailure, HandlerError, Result};

/// Callback invoked for every message a consumer receives.
///
/// Implemented for every `Fn(&MessageId, &[u8]) -> Result<(), HandlerError>`.
/// Handlers run on the consumer's task and should not block for long.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, id: &MessageId, payload: &[u8]) -> std::result::Result<(), HandlerError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&MessageId, &[u8]) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, id: &MessageId, payload: &[u8]) -> std::result::Result<(), HandlerError> {
        self(id, payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total handler attempts per message, at least one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Pause after failed attempt number `attempt` (1-based):
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl From<&ExchangeSettings> for RetryPolicy {
    fn from(settings: &ExchangeSettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            max_delay: Duration::from_millis(settings.retry_max_delay_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ExchangeSettings::default())
    }
}

/// Per-consumer overrides. Anything left `None` comes from the exchange.
#[derive(Debug, Clone, Default)]
pub struct ConsumerOptions {
    pub start: StartPosition,
    pub retry: Option<RetryPolicy>,
}

impl ConsumerOptions {
    pub fn from_beginning() -> Self {
        Self {
            start: StartPosition::Earliest,
            retry: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// Handle to a running consumer loop. Dropping the handle stops the loop.
pub struct Consumer {
    topic: String,
    channel: String,
    token: CancellationToken,
    failures: broadcast::Sender<DeliveryFailure>,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Consumer {
    /// Attach `channel` to `topic` at `start` and spawn the loop.
    pub(crate) fn spawn(
        topic: Arc<Topic>,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
        start: StartPosition,
        retry: RetryPolicy,
        failure_buffer: usize,
    ) -> Result<Self> {
        topic.subscribe(channel, start)?;

        let token = topic.shutdown_token().child_token();
        let (failures, _) = broadcast::channel(failure_buffer.max(1));

        let worker = Worker {
            topic: topic.clone(),
            channel: channel.to_string(),
            handler,
            retry,
            token: token.clone(),
            failures: failures.clone(),
        };
        let task = tokio::spawn(worker.run());

        info!(topic = %topic.name(), channel, "consumer started");
        Ok(Self {
            topic: topic.name().to_string(),
            channel: channel.to_string(),
            token,
            failures,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Messages whose handler ran out of attempts, from now on.
    pub fn failures(&self) -> broadcast::Receiver<DeliveryFailure> {
        self.failures.subscribe()
    }

    /// Cancel the loop. Safe to call more than once.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.lock().as_ref().is_none_or(|task| task.is_finished())
    }

    /// Wait for the loop to end and return how it ended: `Ok` after a stop,
    /// the storage error that killed it otherwise. Only the first call
    /// observes the outcome.
    pub async fn join(&self) -> Result<()> {
        let task = self.task.lock().take();
        match task {
            Some(task) => task
                .await
                .map_err(|e| BrokerError::ConsumerPanicked(e.to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("topic", &self.topic)
            .field("channel", &self.channel)
            .field("stopped", &self.token.is_cancelled())
            .finish()
    }
}

enum Delivery {
    Handled,
    Exhausted { attempts: u32, error: HandlerError },
    Cancelled,
}

struct Worker {
    topic: Arc<Topic>,
    channel: String,
    handler: Arc<dyn MessageHandler>,
    retry: RetryPolicy,
    token: CancellationToken,
    failures: broadcast::Sender<DeliveryFailure>,
}

impl Worker {
    async fn run(self) -> Result<()> {
        let outcome = self.consume().await;
        match &outcome {
            Ok(()) => info!(topic = %self.topic.name(), channel = %self.channel, "consumer stopped"),
            Err(e) => error!(
                topic = %self.topic.name(),
                channel = %self.channel,
                error = %e,
                "consumer terminated"
            ),
        }
        outcome
    }

    async fn consume(&self) -> Result<()> {
        loop {
            let message = match self.topic.read_next_until(&self.channel, &self.token).await {
                Ok(message) => message,
                Err(BrokerError::Stopped) => return Ok(()),
                Err(e) => return Err(e),
            };

            match self.deliver(&message).await {
                Delivery::Handled => {}
                Delivery::Exhausted { attempts, error } => self.report(&message, attempts, error),
                Delivery::Cancelled => return Ok(()),
            }

            match self.topic.mark_read(&self.channel, &message.id) {
                Ok(()) => {}
                Err(BrokerError::Stopped) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    async fn deliver(&self, message: &Message) -> Delivery {
        let mut attempt = 1;
        loop {
            let error = match self.handler.handle(&message.id, &message.payload) {
                Ok(()) => return Delivery::Handled,
                Err(error) => error,
            };

            if attempt >= self.retry.max_attempts {
                return Delivery::Exhausted {
                    attempts: attempt,
                    error,
                };
            }

            let delay = self.retry.delay_for(attempt);
            debug!(
                topic = %self.topic.name(),
                channel = %self.channel,
                id = %message.id,
                attempt,
                ?delay,
                error = %error,
                "handler failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.token.cancelled() => return Delivery::Cancelled,
            }
            attempt += 1;
        }
    }

    fn report(&self, message: &Message, attempts: u32, error: HandlerError) {
        let failure = DeliveryFailure {
            topic: self.topic.name().to_string(),
            channel: self.channel.clone(),
            id: message.id.clone(),
            attempts,
            error: error.to_string(),
        };
        warn!(%failure, "max retries reached, skipping message");
        // nobody listening is fine
        let _ = self.failures.send(failure);
    }
}
