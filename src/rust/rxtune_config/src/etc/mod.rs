//! Manages the `/etc/rxtune.conf` file.

mod defaults;
mod power_state;
mod top_config;

pub use defaults::TuningDefaults;
pub use power_state::PowerStateConfig;
pub use top_config::Config;

use std::path::Path;
use thiserror::Error;
use tracing::{error, info};

/// Default location of the configuration file.
pub const CONFIG_PATH: &str = "/etc/rxtune.conf";

/// Environment variable that overrides [`CONFIG_PATH`].
const CONFIG_ENV: &str = "RXTUNE_CONFIG";

/// Capacity of the core weight vector.
pub const MAX_CORES: usize = 32;

/// Legal receive ring depths, in probing order.
pub const RX_QUEUE_DEPTHS: [u32; 7] = [128, 256, 512, 1024, 2048, 4096, 8192];

/// Legal transmit budgets, in probing order.
pub const TX_BUDGETS: [u32; 9] = [2, 4, 8, 16, 32, 64, 128, 256, 512];

/// Loads and validates the configuration. Uses `$RXTUNE_CONFIG` if set,
/// otherwise `/etc/rxtune.conf`. If neither exists, the built-in defaults
/// are used.
pub fn load_config() -> Result<Config, ConfigError> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| CONFIG_PATH.to_string());
    if !Path::new(&path).exists() {
        info!("{path} does not exist, using built-in defaults");
        let config = Config::default();
        config.validate().map_err(ConfigError::Invalid)?;
        return Ok(config);
    }

    let raw = std::fs::read_to_string(&path).map_err(|e| {
        error!("Unable to read contents of {path}");
        ConfigError::Read(e)
    })?;
    let config = Config::load_from_string(&raw)?;
    info!("Loaded configuration from {path}");
    Ok(config)
}

/// Errors from loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read
    #[error("Unable to read configuration file: {0}")]
    Read(#[from] std::io::Error),
    /// The file is not valid TOML for this schema
    #[error("Unable to parse configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    /// The file parsed, but the values are inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
