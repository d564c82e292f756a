//! Top-level configuration file for the tuner.

use super::{
    ConfigError, PowerStateConfig, TuningDefaults, MAX_CORES, RX_QUEUE_DEPTHS,
    TX_BUDGETS,
};
use serde::{Deserialize, Serialize};

/// Top-level configuration file for the tuner.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Interface under tuning
    pub interface: String,

    /// Driver counter of packets handled by the action under test
    pub action_metric: String,

    /// Driver counter of every packet received by the port
    pub total_metric: String,

    /// Settle time before each counter sample, in seconds
    pub interval_secs: u64,

    /// A configuration "processes everything" if fewer packets per second
    /// than this go unprocessed.
    pub drop_threshold: u64,

    /// Throughput ratio a challenger must beat. 1.0 means strictly
    /// greater; larger values add hysteresis.
    pub pps_threshold: f64,

    /// Upper bound on cores servicing the interface
    pub max_cores: u32,

    /// Run the core grow/shrink step at the end of each round
    pub core_elasticity: bool,

    /// Zero the throughput reference at the start of each round
    pub reset_reference_each_round: bool,

    /// Optional CSV file receiving one row per tuning step
    pub log_file: Option<String>,

    /// Starting interface settings
    pub defaults: TuningDefaults,

    /// Power-state register
    pub power_state: PowerStateConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: "enp52s0f1np1".to_string(),
            action_metric: "rx_xdp_drop".to_string(),
            total_metric: "rx_packets_phy".to_string(),
            interval_secs: 5,
            drop_threshold: 100,
            pps_threshold: 1.0,
            max_cores: MAX_CORES as u32,
            core_elasticity: false,
            reset_reference_each_round: false,
            log_file: Some("results.csv".to_string()),
            defaults: TuningDefaults::default(),
            power_state: PowerStateConfig::default(),
        }
    }
}

impl Config {
    /// Test is a configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.interface.trim().is_empty() {
            return Err("An interface must be specified".to_string());
        }
        if self.action_metric.trim().is_empty() || self.total_metric.trim().is_empty() {
            return Err("Both action_metric and total_metric must be set".to_string());
        }
        if self.interval_secs == 0 {
            return Err("interval_secs must be at least 1".to_string());
        }
        if !self.pps_threshold.is_finite() || self.pps_threshold <= 0.0 {
            return Err(format!(
                "pps_threshold must be a positive ratio, not {}",
                self.pps_threshold
            ));
        }
        if self.max_cores == 0 || self.max_cores as usize > MAX_CORES {
            return Err(format!("max_cores must be between 1 and {MAX_CORES}"));
        }
        let d = &self.defaults;
        if !RX_QUEUE_DEPTHS.contains(&d.rx_queue_depth) {
            return Err(format!(
                "rx_queue_depth {} is not one of {:?}",
                d.rx_queue_depth, RX_QUEUE_DEPTHS
            ));
        }
        if !TX_BUDGETS.contains(&d.tx_budget) {
            return Err(format!(
                "tx_budget {} is not one of {:?}",
                d.tx_budget, TX_BUDGETS
            ));
        }
        if d.core_count == 0 || d.core_count > self.max_cores {
            return Err(format!(
                "core_count {} must be between 1 and max_cores ({})",
                d.core_count, self.max_cores
            ));
        }
        let [low, high] = self.power_state.values;
        if low == high {
            return Err("The two power-state values must differ".to_string());
        }
        if !self.power_state.values.contains(&d.power_state) {
            return Err(format!(
                "Default power state {:#x} must be one of {:#x} or {:#x}",
                d.power_state, low, high
            ));
        }
        Ok(())
    }

    /// Parses and validates a configuration from TOML text.
    pub fn load_from_string(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }
}
