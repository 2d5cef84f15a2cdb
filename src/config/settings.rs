use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for storage, the exchange and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub storage: StorageSettings,
    pub exchange: ExchangeSettings,
    pub logging: LoggingSettings,
}

/// Where the exchange keeps its sled database.
///
/// With `temporary` set the database lives in a scratch location and is
/// removed when the exchange is dropped.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    pub path: String,
    pub temporary: bool,
}

/// Configuration settings for the exchange, its topics and consumers.
#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeSettings {
    /// Handler attempts per message before it is given up on.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Upper bound for the backoff between two handler attempts.
    pub retry_max_delay_ms: u64,
    /// Seconds between two compaction passes of a topic. Zero is read as one.
    pub compaction_interval_secs: u64,
    /// Topics whose name ends with this suffix live in memory only.
    pub ephemeral_suffix: String,
    /// Capacity of each consumer's delivery-failure channel.
    pub failure_buffer: usize,
}

impl ExchangeSettings {
    pub fn compaction_interval(&self) -> Duration {
        Duration::from_secs(self.compaction_interval_secs.max(1))
    }

    pub fn is_ephemeral(&self, topic: &str) -> bool {
        !self.ephemeral_suffix.is_empty() && topic.ends_with(&self.ephemeral_suffix)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows settings to be given partially. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub storage: Option<PartialStorageSettings>,
    pub exchange: Option<PartialExchangeSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialStorageSettings {
    pub path: Option<String>,
    pub temporary: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PartialExchangeSettings {
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub compaction_interval_secs: Option<u64>,
    pub ephemeral_suffix: Option<String>,
    pub failure_buffer: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Settings {
    /// Fill every missing value of `partial` from `Settings::default()`.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let storage = partial.storage;
        let exchange = partial.exchange;
        let logging = partial.logging;

        Settings {
            storage: StorageSettings {
                path: storage
                    .as_ref()
                    .and_then(|s| s.path.clone())
                    .unwrap_or(default.storage.path),
                temporary: storage
                    .as_ref()
                    .and_then(|s| s.temporary)
                    .unwrap_or(default.storage.temporary),
            },
            exchange: ExchangeSettings {
                max_retries: exchange
                    .as_ref()
                    .and_then(|e| e.max_retries)
                    .unwrap_or(default.exchange.max_retries),
                retry_base_delay_ms: exchange
                    .as_ref()
                    .and_then(|e| e.retry_base_delay_ms)
                    .unwrap_or(default.exchange.retry_base_delay_ms),
                retry_max_delay_ms: exchange
                    .as_ref()
                    .and_then(|e| e.retry_max_delay_ms)
                    .unwrap_or(default.exchange.retry_max_delay_ms),
                compaction_interval_secs: exchange
                    .as_ref()
                    .and_then(|e| e.compaction_interval_secs)
                    .unwrap_or(default.exchange.compaction_interval_secs),
                ephemeral_suffix: exchange
                    .as_ref()
                    .and_then(|e| e.ephemeral_suffix.clone())
                    .unwrap_or(default.exchange.ephemeral_suffix),
                failure_buffer: exchange
                    .as_ref()
                    .and_then(|e| e.failure_buffer)
                    .unwrap_or(default.exchange.failure_buffer),
            },
            logging: LoggingSettings {
                level: logging
                    .as_ref()
                    .and_then(|l| l.level.clone())
                    .unwrap_or(default.logging.level),
            },
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            storage: StorageSettings {
                path: "_msq_".to_string(),
                temporary: false,
            },
            exchange: ExchangeSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            compaction_interval_secs: 300,
            ephemeral_suffix: "#temp".to_string(),
            failure_buffer: 64,
        }
    }
}
