mod settings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerSettings, DeadLetterKind, DeadLetterSettings, ForwarderSettings, LoggingSettings,
    QueueSettings, ReconnectSettings, RetrySettings, Settings, ShutdownSettings, SinkSettings,
};

/// Prefix of environment variables that override configuration,
/// e.g. `BRIDGE_SINK__URL`.
pub const ENV_PREFIX: &str = "BRIDGE";

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(None)
}

/// Loads the configuration from `path` (or `config/default` when `None`)
/// and environment variables, then validates it.
///
/// An explicit path must exist; the default file is optional.
pub fn load_config_from(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name("config/default").required(false),
    };

    let builder = Config::builder().add_source(file).add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings
        .validate()
        .map_err(|problems| ConfigError::Message(problems.join("; ")))?;
    Ok(settings)
}
