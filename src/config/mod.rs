mod settings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{LogSettings, QueueSettings, ServerSettings, Settings, StorageSettings};

/// Prefix for environment overrides, e.g. `RELAYQ__QUEUE__MAX_TTL=600`.
pub const ENV_PREFIX: &str = "RELAYQ";

/// Loads `config/default.*` (optional) and `RELAYQ__*` environment
/// variables, merged over `Settings::default()`.
pub fn load_config() -> Result<Settings, ConfigError> {
    load(File::with_name("config/default").required(false))
}

/// Like [`load_config`], but reads the given file, which must exist.
pub fn load_config_from(path: &Path) -> Result<Settings, ConfigError> {
    load(File::from(path).required(true))
}

fn load<S>(file: S) -> Result<Settings, ConfigError>
where
    S: config::Source + Send + Sync + 'static,
{
    let config = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let partial: PartialSettings = config.try_deserialize()?;
    let settings = partial.merge_onto(Settings::default());

    settings.queue.validate().map_err(ConfigError::Message)?;
    Ok(settings)
}

#[cfg(test)]
mod tests;
