use serde::{Deserialize, Serialize};

/// The model-specific register toggled by the power-state dimension.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct PowerStateConfig {
    /// Register address
    pub register: u32,

    /// The two values the tuner alternates between
    pub values: [u64; 2],
}

impl Default for PowerStateConfig {
    fn default() -> Self {
        Self {
            register: 0xc8b,
            values: [0x6000, 0x7fff],
        }
    }
}
