//! Starting point of the search.

use serde::{Deserialize, Serialize};

/// Interface settings applied at startup, before the first round.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct TuningDefaults {
    /// Receive ring depth. Must be one of `RX_QUEUE_DEPTHS`.
    pub rx_queue_depth: u32,

    /// Transmit budget. Must be one of `TX_BUDGETS`.
    pub tx_budget: u32,

    /// Driver private flag `rx_cqe_compress`
    pub cqe_compress: bool,

    /// Driver private flag `rx_striding_rq`
    pub rx_striding: bool,

    /// Number of cores that receive RSS traffic, counted from core 0
    pub core_count: u32,

    /// Initial value of the power-state register
    pub power_state: u64,
}

impl Default for TuningDefaults {
    fn default() -> Self {
        Self {
            rx_queue_depth: 1024,
            tx_budget: 64,
            cqe_compress: true,
            rx_striding: true,
            core_count: 10,
            power_state: 0x6000,
        }
    }
}
