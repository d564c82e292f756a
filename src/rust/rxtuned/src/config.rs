use crate::rebalancer::ElasticityPolicy;
use crate::selection::SelectionPolicy;
use rxtune_config::Config;
use rxtune_sys::num_possible_cpus;
use std::time::Duration;
use tracing::{debug, warn};

/// The parts of the configuration file the control loop reads, in the
/// shapes the individual components want.
#[derive(Debug, Clone, PartialEq)]
pub struct TunerSettings {
    pub interval: Duration,
    pub selection: SelectionPolicy,
    pub elasticity: ElasticityPolicy,
    pub power_values: [u64; 2],
    pub core_elasticity: bool,
    pub reset_reference_each_round: bool,
}

impl TunerSettings {
    /// `possible_cpus` caps `max_cores` when the machine has fewer.
    pub fn from_config(config: &Config, possible_cpus: Option<u32>) -> Self {
        let interval = Duration::from_secs(config.interval_secs);
        let max_cores = match possible_cpus {
            Some(cpus) if cpus > 0 && cpus < config.max_cores => {
                warn!(
                    "max_cores is {} but only {cpus} CPUs exist, using {cpus}",
                    config.max_cores
                );
                cpus
            }
            _ => config.max_cores,
        };
        Self {
            interval,
            selection: SelectionPolicy {
                drop_threshold: config.drop_threshold,
                pps_threshold: config.pps_threshold,
            },
            elasticity: ElasticityPolicy {
                max_cores,
                pps_threshold: config.pps_threshold,
                interval,
            },
            power_values: config.power_state.values,
            core_elasticity: config.core_elasticity,
            reset_reference_each_round: config.reset_reference_each_round,
        }
    }
}

/// Loads the configuration file and derives the loop settings from it.
pub fn configure() -> anyhow::Result<(Config, TunerSettings)> {
    debug!("Configuring rxtune...");
    let config = rxtune_config::load_config()?;
    let possible = num_possible_cpus().ok();
    if let Some(cpus) = possible {
        if config.defaults.core_count > cpus {
            return Err(anyhow::anyhow!(
                "core_count {} exceeds the {cpus} CPUs on this machine",
                config.defaults.core_count
            ));
        }
    }
    let settings = TunerSettings::from_config(&config, possible);
    Ok((config, settings))
}
