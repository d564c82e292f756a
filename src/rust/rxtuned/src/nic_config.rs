use rxtune_config::{Config, MAX_CORES};

/// The interface settings the tuner owns. One value is threaded through
/// every step: passed in, modified, handed back.
#[derive(Debug, Clone, PartialEq)]
pub struct NicConfig {
    pub iface: String,
    pub action_metric: String,
    pub total_metric: String,
    pub rx_queue_depth: u32,
    pub tx_budget: u32,
    pub cqe_compress: bool,
    pub rx_striding: bool,
    /// RSS weight per core. Always `core_count` ones from index 0.
    pub core_weights: [u32; MAX_CORES],
    pub core_count: u32,
    pub power_state: u64,
}

impl NicConfig {
    /// Builds the startup configuration from the `[defaults]` section.
    pub fn from_config(config: &Config) -> Self {
        let d = &config.defaults;
        Self {
            iface: config.interface.clone(),
            action_metric: config.action_metric.clone(),
            total_metric: config.total_metric.clone(),
            rx_queue_depth: d.rx_queue_depth,
            tx_budget: d.tx_budget,
            cqe_compress: d.cqe_compress,
            rx_striding: d.rx_striding,
            core_weights: core_weights(d.core_count),
            core_count: d.core_count,
            power_state: d.power_state,
        }
    }

    /// Changes the number of active cores, re-deriving the weights.
    pub fn set_core_count(&mut self, core_count: u32) {
        self.core_count = core_count;
        self.core_weights = core_weights(core_count);
    }

    /// Number of cores with a non-zero weight.
    pub fn weighted_cores(&self) -> usize {
        self.core_weights.iter().filter(|w| **w > 0).count()
    }
}

/// First `active` cores get weight 1, the rest 0.
pub fn core_weights(active: u32) -> [u32; MAX_CORES] {
    let mut weights = [0; MAX_CORES];
    weights
        .iter_mut()
        .take(active as usize)
        .for_each(|w| *w = 1);
    weights
}
