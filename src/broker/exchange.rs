//! Exchange
//!
//! The exchange is the registry and lifecycle owner of every topic in one
//! broker instance:
//! - opens the sled database and remembers durable topic names in it
//! - creates topics on demand and restores durable ones on `run`
//! - hands out publishers and consumers bound to its topics
//! - stops everything on `stop`
//!
//! Concurrency and usage notes:
//! - `Exchange` is a cheap handle; clones share the same state. Several
//!   independent exchanges can live in one process as long as they use
//!   different storage paths.
//! - The topic map has its own lock, taken only to create or look up a topic.
//!   Message traffic only touches the topic's lock.
//! - Topic creation spawns a compaction task, so `run`, `create_topic`,
//!   publishing to a new topic and `new_consumer` must happen inside a tokio
//!   runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::broker::consumer::{Consumer, ConsumerOptions, RetryPolicy};
use crate::broker::message::MessageId;
use crate::broker::publisher::Publisher;
use crate::broker::topic::Topic;
use crate::config::{ExchangeSettings, Settings};
use crate::persistence::{MemoryLog, Persistence, TopicLog};
use crate::utils::error::{BrokerError, HandlerError, Result};

#[derive(Clone)]
pub struct Exchange {
    shared: Arc<Shared>,
}

struct Shared {
    settings: ExchangeSettings,
    running: AtomicBool,
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    store: RwLock<Option<Persistence>>,
}

impl Exchange {
    /// Open the storage described by `settings`. The exchange accepts no
    /// traffic until `run`.
    pub fn open(settings: &Settings) -> Result<Self> {
        let store = Persistence::open(&settings.storage)?;
        info!(path = %settings.storage.path, "exchange opened");

        Ok(Self {
            shared: Arc::new(Shared {
                settings: settings.exchange.clone(),
                running: AtomicBool::new(false),
                topics: RwLock::new(HashMap::new()),
                store: RwLock::new(Some(store)),
            }),
        })
    }

    pub fn settings(&self) -> &ExchangeSettings {
        &self.shared.settings
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Start accepting traffic and bring every durable topic back.
    pub fn run(&self) -> Result<()> {
        let names = {
            let store = self.shared.store.read();
            let store = store.as_ref().ok_or(BrokerError::Stopped)?;
            store.list_topic_names()?
        };
        self.shared.running.store(true, Ordering::Release);

        for name in &names {
            self.ensure_topic(name)?;
        }
        info!(restored = names.len(), "exchange running");
        Ok(())
    }

    /// Stop every topic and release the storage. Every later call fails with
    /// `Stopped`. Safe to call more than once.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);

        let topics: Vec<Arc<Topic>> = {
            let mut topics = self.shared.topics.write();
            topics.drain().map(|(_, topic)| topic).collect()
        };
        for topic in &topics {
            topic.stop();
        }

        if let Some(store) = self.shared.store.write().take() {
            if let Err(e) = store.flush() {
                warn!(error = %e, "failed to flush storage on stop");
            }
            info!(topics = topics.len(), "exchange stopped");
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(BrokerError::Stopped)
        }
    }

    /// Create `name` if it does not exist yet. Idempotent.
    pub fn create_topic(&self, name: &str) -> Result<()> {
        self.ensure_topic(name).map(|_| ())
    }

    /// Look up `name`, creating and starting it if absent.
    pub(crate) fn ensure_topic(&self, name: &str) -> Result<Arc<Topic>> {
        self.ensure_running()?;
        if let Some(topic) = self.shared.topics.read().get(name) {
            return Ok(topic.clone());
        }

        let mut topics = self.shared.topics.write();
        // stop drains the map under this lock; re-check both
        self.ensure_running()?;
        if let Some(topic) = topics.get(name) {
            return Ok(topic.clone());
        }

        let ephemeral = self.shared.settings.is_ephemeral(name);
        let log: Box<dyn TopicLog> = if ephemeral {
            Box::new(MemoryLog::default())
        } else {
            let store = self.shared.store.read();
            let store = store.as_ref().ok_or(BrokerError::Stopped)?;
            if !store.insert_topic_name(name)? {
                debug!(topic = name, "topic already registered");
            }
            Box::new(store.open_topic_log(name)?)
        };

        let topic = Arc::new(Topic::open(name, log, ephemeral)?);
        topic.start(self.shared.settings.compaction_interval())?;
        topics.insert(name.to_string(), topic.clone());
        Ok(topic)
    }

    pub fn get_topic(&self, name: &str) -> Result<Arc<Topic>> {
        self.ensure_running()?;
        self.shared
            .topics
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::TopicNotFound(name.to_string()))
    }

    /// Names of all live topics, sorted.
    pub fn topic_names(&self) -> Result<Vec<String>> {
        self.ensure_running()?;
        let mut names: Vec<String> = self.shared.topics.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Remove every message and channel offset of `name`.
    pub fn clear_topic(&self, name: &str) -> Result<()> {
        self.get_topic(name)?.clear()
    }

    pub fn new_publisher(&self) -> Result<Publisher> {
        self.ensure_running()?;
        Ok(Publisher::new(self.clone()))
    }

    /// Consume `topic` as `channel`, starting with messages sent from now on.
    pub fn new_consumer<H>(&self, topic: &str, channel: &str, handler: H) -> Result<Consumer>
    where
        H: Fn(&MessageId, &[u8]) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.new_consumer_with(topic, channel, handler, ConsumerOptions::default())
    }

    pub fn new_consumer_with<H>(
        &self,
        topic: &str,
        channel: &str,
        handler: H,
        options: ConsumerOptions,
    ) -> Result<Consumer>
    where
        H: Fn(&MessageId, &[u8]) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        let topic = self.ensure_topic(topic)?;
        let retry = options
            .retry
            .unwrap_or_else(|| RetryPolicy::from(&self.shared.settings));

        Consumer::spawn(
            topic,
            channel,
            Arc::new(handler),
            options.start,
            retry,
            self.shared.settings.failure_buffer,
        )
    }
}

impl std::fmt::Debug for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("running", &self.is_running())
            .field("topics", &self.shared.topics.read().len())
            .finish()
    }
}
