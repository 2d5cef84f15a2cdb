//! Topic management
//!
//! A `Topic` is an append-only log plus a table of channel offsets. Channels
//! are named read cursors: each one sees every message with an id strictly
//! greater than its offset, independently of the others.
//!
//! Delivery is pull based. `read_next` returns the next unread message or
//! parks the caller on a oneshot registered in the same lock hold as the
//! failed lookup, so a concurrent `send` can never slip between the two.
//! `send` fires every parked waiter; each one re-runs its own lookup.
//!
//! A background task compacts the log on a fixed interval, dropping the
//! prefix that the slowest channel has already consumed.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::message::{Message, MessageId};
use crate::persistence::TopicLog;
use crate::utils::error::{BrokerError, Result};

/// Shortest period the compaction task will tick at.
pub const MIN_COMPACTION_INTERVAL: Duration = Duration::from_millis(1);

/// Where a channel that has never read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Only messages sent after the channel attaches.
    #[default]
    Latest,
    /// Everything still in the log.
    Earliest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicStatus {
    Created,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopicMetrics {
    pub total_messages: u64,
    pub total_channels: u64,
}

pub struct Topic {
    name: String,
    ephemeral: bool,
    state: RwLock<TopicState>,
    shutdown: CancellationToken,
    compactor: Mutex<Option<JoinHandle<()>>>,
}

struct TopicState {
    status: TopicStatus,
    log: Option<Box<dyn TopicLog>>,
    last: Option<MessageId>,
    waiters: Vec<oneshot::Sender<()>>,
}

impl TopicState {
    fn log(&self) -> Result<&dyn TopicLog> {
        match (&self.status, &self.log) {
            (TopicStatus::Running, Some(log)) => Ok(&**log),
            _ => Err(BrokerError::Stopped),
        }
    }

    fn wake_all(&mut self) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    /// Offset of `channel`, attaching it at `start` if it has none.
    fn attach(&self, channel: &str, start: StartPosition) -> Result<MessageId> {
        let log = self.log()?;
        if let Some(offset) = log.offset(channel)? {
            return Ok(offset);
        }
        let offset = match start {
            StartPosition::Latest => self.last.clone().unwrap_or_else(MessageId::zero),
            StartPosition::Earliest => MessageId::zero(),
        };
        log.upsert_offset(channel, &offset)?;
        Ok(offset)
    }
}

impl Topic {
    /// Wrap `log` in a topic. The topic rejects all traffic until `start`.
    pub fn open(name: impl Into<String>, log: Box<dyn TopicLog>, ephemeral: bool) -> Result<Self> {
        // compaction may have removed the newest message; offsets still
        // remember how far ids got
        let last = log.last_id()?.max(log.max_offset()?);

        Ok(Self {
            name: name.into(),
            ephemeral,
            state: RwLock::new(TopicState {
                status: TopicStatus::Created,
                log: Some(log),
                last,
                waiters: Vec::new(),
            }),
            shutdown: CancellationToken::new(),
            compactor: Mutex::new(None),
        })
    }

    /// Move to `Running` and spawn the compaction task. Must be called from
    /// within a tokio runtime. Starting twice is a no-op.
    ///
    /// Intervals shorter than `MIN_COMPACTION_INTERVAL` are raised to it.
    pub fn start(self: &Arc<Self>, compaction_interval: Duration) -> Result<()> {
        {
            let mut state = self.state.write();
            match state.status {
                TopicStatus::Created => state.status = TopicStatus::Running,
                TopicStatus::Running => return Ok(()),
                TopicStatus::Stopped => return Err(BrokerError::Stopped),
            }
        }

        if compaction_interval < MIN_COMPACTION_INTERVAL {
            warn!(
                topic = %self.name,
                requested = ?compaction_interval,
                using = ?MIN_COMPACTION_INTERVAL,
                "compaction interval too short, raising it"
            );
        }
        let handle = tokio::spawn(run_compaction(
            Arc::downgrade(self),
            self.shutdown.clone(),
            compaction_interval.max(MIN_COMPACTION_INTERVAL),
        ));
        *self.compactor.lock() = Some(handle);

        info!(topic = %self.name, ephemeral = self.ephemeral, "topic started");
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn status(&self) -> TopicStatus {
        self.state.read().status
    }

    pub fn is_running(&self) -> bool {
        self.status() == TopicStatus::Running
    }

    /// Token cancelled when the topic stops. Consumers derive theirs from it.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Append `payload` and wake every parked reader.
    pub fn send(&self, payload: impl Into<Vec<u8>>) -> Result<MessageId> {
        let mut state = self.state.write();

        let now = Utc::now().timestamp_millis();
        let message = Message {
            id: MessageId::next(now, state.last.as_ref()),
            timestamp: now,
            payload: payload.into(),
        };
        state.log()?.append(&message)?;
        state.last = Some(message.id.clone());
        state.wake_all();

        debug!(topic = %self.name, id = %message.id, "message appended");
        Ok(message.id)
    }

    /// Attach `channel` explicitly. A channel that already has an offset
    /// keeps it. Returns the channel's offset.
    pub fn subscribe(&self, channel: &str, start: StartPosition) -> Result<MessageId> {
        self.state.write().attach(channel, start)
    }

    /// Next message for `channel`, waiting for one if it has read everything.
    ///
    /// A channel reading for the first time attaches at `StartPosition::Latest`.
    /// Returns `Stopped` once the topic stops.
    pub async fn read_next(&self, channel: &str) -> Result<Message> {
        self.read_next_until(channel, &self.shutdown).await
    }

    /// Like `read_next`, but also gives up with `Stopped` when `cancel` fires.
    pub async fn read_next_until(
        &self,
        channel: &str,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        loop {
            if cancel.is_cancelled() {
                return Err(BrokerError::Stopped);
            }

            let woken = {
                let mut state = self.state.write();
                let offset = state.attach(channel, StartPosition::Latest)?;
                if let Some(message) = state.log()?.next_after(&offset)? {
                    return Ok(message);
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                rx
            };

            // a dropped sender means the topic stopped; the next lookup
            // reports it
            tokio::select! {
                _ = woken => {}
                _ = cancel.cancelled() => return Err(BrokerError::Stopped),
            }
        }
    }

    /// Record that `channel` has processed everything up to `id`.
    pub fn mark_read(&self, channel: &str, id: &MessageId) -> Result<()> {
        let state = self.state.read();
        state.log()?.upsert_offset(channel, id)?;
        debug!(topic = %self.name, channel, id = %id, "offset advanced");
        Ok(())
    }

    pub fn offset(&self, channel: &str) -> Result<Option<MessageId>> {
        Ok(self.state.read().log()?.offset(channel)?)
    }

    pub fn metrics(&self) -> Result<TopicMetrics> {
        let state = self.state.read();
        let log = state.log()?;
        Ok(TopicMetrics {
            total_messages: log.message_count()?,
            total_channels: log.channel_count()?,
        })
    }

    /// Drop every message and every channel offset. Ids keep increasing
    /// from where they were.
    pub fn clear(&self) -> Result<()> {
        let state = self.state.write();
        state.log()?.clear()?;
        info!(topic = %self.name, "topic cleared");
        Ok(())
    }

    /// Delete the prefix every channel has consumed. Returns the number of
    /// messages removed.
    pub fn compact(&self) -> Result<usize> {
        let state = self.state.write();
        compact_log(state.log()?)
    }

    /// Stop the topic: wake every reader with `Stopped`, cancel compaction,
    /// compact one last time and release the log. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut state = self.state.write();
        if state.status == TopicStatus::Stopped {
            return;
        }
        state.status = TopicStatus::Stopped;
        self.shutdown.cancel();
        // dropping the senders wakes the receivers
        state.waiters.clear();

        if let Some(log) = state.log.take() {
            match compact_log(&*log) {
                Ok(removed) => debug!(topic = %self.name, removed, "final compaction"),
                Err(e) => warn!(topic = %self.name, error = %e, "final compaction failed"),
            }
            if let Err(e) = log.flush() {
                warn!(topic = %self.name, error = %e, "failed to flush topic log");
            }
        }
        drop(state);

        if let Some(handle) = self.compactor.lock().take() {
            handle.abort();
        }
        info!(topic = %self.name, "topic stopped");
    }
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("ephemeral", &self.ephemeral)
            .field("status", &self.status())
            .finish()
    }
}

fn compact_log(log: &dyn TopicLog) -> Result<usize> {
    // the slowest channel bounds what is safe to drop; no channels, no bound
    let Some(boundary) = log.min_offset()? else {
        return Ok(0);
    };
    Ok(log.delete_up_to(&boundary)?)
}

async fn run_compaction(topic: Weak<Topic>, shutdown: CancellationToken, every: Duration) {
    let mut ticker = tokio::time::interval(every.max(MIN_COMPACTION_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(topic) = topic.upgrade() else {
                    warn!("topic dropped without stop, compaction task exiting");
                    break;
                };
                match topic.compact() {
                    Ok(0) => {}
                    Ok(removed) => debug!(topic = %topic.name, removed, "compacted"),
                    Err(BrokerError::Stopped) => {
                        debug!(topic = %topic.name, "topic stopped, compaction task exiting");
                        break;
                    }
                    Err(e) => warn!(topic = %topic.name, error = %e, "compaction failed"),
                }
            }
        }
    }
}
