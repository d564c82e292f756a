//! Configuration for the receive-path tuner, read from `/etc/rxtune.conf`.

mod etc;

pub use etc::{
    load_config, Config, ConfigError, TuningDefaults, PowerStateConfig,
    CONFIG_PATH, MAX_CORES, RX_QUEUE_DEPTHS, TX_BUDGETS,
};
