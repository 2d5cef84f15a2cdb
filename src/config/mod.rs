mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    ExchangeSettings, LoggingSettings, PartialExchangeSettings, PartialLoggingSettings,
    PartialSettings, PartialStorageSettings, Settings, StorageSettings,
};

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
///
/// Environment keys use a `MSQ` prefix and `__` between levels, for example
/// `MSQ__EXCHANGE__MAX_RETRIES=5`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("MSQ")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merge(partial))
}
