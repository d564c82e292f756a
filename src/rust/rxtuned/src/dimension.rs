use crate::error::TunerError;
use crate::nic_config::NicConfig;
use rxtune_config::{RX_QUEUE_DEPTHS, TX_BUDGETS};
use std::fmt::Display;

/// One axis of the configuration space, tuned in a fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    RxQueueDepth,
    TxBudget,
    CqeCompress,
    RxStriding,
    PowerState,
}

impl Dimension {
    /// Every dimension, in round order.
    pub const ROUND: [Dimension; 5] = [
        Dimension::RxQueueDepth,
        Dimension::TxBudget,
        Dimension::CqeCompress,
        Dimension::RxStriding,
        Dimension::PowerState,
    ];

    /// The dimension tuned after this one, or `None` at the end of a round.
    pub fn next(self) -> Option<Dimension> {
        let idx = Self::ROUND.iter().position(|d| *d == self)?;
        Self::ROUND.get(idx + 1).copied()
    }

    /// The setting this dimension currently has in `config`.
    pub fn current(self, config: &NicConfig) -> Setting {
        match self {
            Dimension::RxQueueDepth => Setting::RxQueueDepth(config.rx_queue_depth),
            Dimension::TxBudget => Setting::TxBudget(config.tx_budget),
            Dimension::CqeCompress => Setting::CqeCompress(config.cqe_compress),
            Dimension::RxStriding => Setting::RxStriding(config.rx_striding),
            Dimension::PowerState => Setting::PowerState(config.power_state),
        }
    }

    /// The settings worth trying next to the current one. Ladders yield
    /// their lower then upper neighbour where those exist; toggles yield
    /// the other value.
    pub fn probes(
        self,
        config: &NicConfig,
        power_values: [u64; 2],
    ) -> Result<Vec<(CandidateOrigin, Setting)>, TunerError> {
        let probes = match self.current(config) {
            Setting::RxQueueDepth(depth) => {
                let (lower, upper) = ladder_neighbors(&RX_QUEUE_DEPTHS, depth)
                    .ok_or_else(|| self.illegal(depth as u64))?;
                neighbor_probes(lower, upper, Setting::RxQueueDepth)
            }
            Setting::TxBudget(budget) => {
                let (lower, upper) = ladder_neighbors(&TX_BUDGETS, budget)
                    .ok_or_else(|| self.illegal(budget as u64))?;
                neighbor_probes(lower, upper, Setting::TxBudget)
            }
            Setting::CqeCompress(on) => vec![(CandidateOrigin::Toggled, Setting::CqeCompress(!on))],
            Setting::RxStriding(on) => vec![(CandidateOrigin::Toggled, Setting::RxStriding(!on))],
            Setting::PowerState(value) => {
                let other = toggle_power_state(power_values, value).ok_or_else(|| self.illegal(value))?;
                vec![(CandidateOrigin::Toggled, Setting::PowerState(other))]
            }
        };
        Ok(probes)
    }

    fn illegal(self, value: u64) -> TunerError {
        TunerError::IllegalSetting {
            dimension: self,
            value,
        }
    }
}

impl Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dimension::RxQueueDepth => write!(f, "RX queue depth"),
            Dimension::TxBudget => write!(f, "TX budget"),
            Dimension::CqeCompress => write!(f, "CQE compression"),
            Dimension::RxStriding => write!(f, "RX striding"),
            Dimension::PowerState => write!(f, "power state"),
        }
    }
}

/// A value for one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    RxQueueDepth(u32),
    TxBudget(u32),
    CqeCompress(bool),
    RxStriding(bool),
    PowerState(u64),
}

impl Setting {
    /// Stores this setting in `config`.
    pub fn write_to(self, config: &mut NicConfig) {
        match self {
            Setting::RxQueueDepth(depth) => config.rx_queue_depth = depth,
            Setting::TxBudget(budget) => config.tx_budget = budget,
            Setting::CqeCompress(on) => config.cqe_compress = on,
            Setting::RxStriding(on) => config.rx_striding = on,
            Setting::PowerState(value) => config.power_state = value,
        }
    }
}

impl Display for Setting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Setting::RxQueueDepth(depth) => write!(f, "rxqueue {depth}"),
            Setting::TxBudget(budget) => write!(f, "budget {budget}"),
            Setting::CqeCompress(on) => write!(f, "rx_cqe_compress {}", on_off(*on)),
            Setting::RxStriding(on) => write!(f, "rx_striding_rq {}", on_off(*on)),
            Setting::PowerState(value) => write!(f, "msr {value:#x}"),
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

/// Where a candidate came from relative to the live setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOrigin {
    Current,
    Lower,
    Upper,
    Toggled,
}

impl Display for CandidateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateOrigin::Current => write!(f, "Current"),
            CandidateOrigin::Lower => write!(f, "Lower"),
            CandidateOrigin::Upper => write!(f, "Upper"),
            CandidateOrigin::Toggled => write!(f, "Toggled"),
        }
    }
}

/// Finds `current` in `ladder` and returns its lower and upper
/// neighbours. `None` if `current` is not on the ladder.
pub fn ladder_neighbors(ladder: &[u32], current: u32) -> Option<(Option<u32>, Option<u32>)> {
    let idx = ladder.iter().position(|v| *v == current)?;
    let lower = idx.checked_sub(1).map(|i| ladder[i]);
    let upper = ladder.get(idx + 1).copied();
    Some((lower, upper))
}

fn neighbor_probes(
    lower: Option<u32>,
    upper: Option<u32>,
    setting: fn(u32) -> Setting,
) -> Vec<(CandidateOrigin, Setting)> {
    let mut probes = Vec::with_capacity(2);
    if let Some(lower) = lower {
        probes.push((CandidateOrigin::Lower, setting(lower)));
    }
    if let Some(upper) = upper {
        probes.push((CandidateOrigin::Upper, setting(upper)));
    }
    probes
}

/// The other of the two power-state values, or `None` if `current` is
/// neither.
pub fn toggle_power_state(values: [u64; 2], current: u64) -> Option<u64> {
    match values {
        [a, b] if current == a => Some(b),
        [a, b] if current == b => Some(a),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rxtune_config::Config;

    const POWER: [u64; 2] = [0x6000, 0x7fff];

    fn config() -> NicConfig {
        NicConfig::from_config(&Config::default())
    }

    #[test]
    fn neighbors_in_the_middle_of_a_ladder() {
        let ladder = [128, 256, 512, 1024];
        assert_eq!(ladder_neighbors(&ladder, 256), Some((Some(128), Some(512))));
    }

    #[test]
    fn edges_have_one_neighbor() {
        let ladder = [128, 256, 512, 1024];
        assert_eq!(ladder_neighbors(&ladder, 128), Some((None, Some(256))));
        assert_eq!(ladder_neighbors(&ladder, 1024), Some((Some(512), None)));
        assert_eq!(ladder_neighbors(&ladder, 1000), None);
    }

    #[test]
    fn ladder_probes_are_lower_then_upper() {
        let probes = Dimension::RxQueueDepth.probes(&config(), POWER).unwrap();
        assert_eq!(
            probes,
            vec![
                (CandidateOrigin::Lower, Setting::RxQueueDepth(512)),
                (CandidateOrigin::Upper, Setting::RxQueueDepth(2048)),
            ]
        );
    }

    #[test]
    fn ladder_probes_stay_on_the_ladder() {
        let mut cfg = config();
        cfg.tx_budget = 2;
        let probes = Dimension::TxBudget.probes(&cfg, POWER).unwrap();
        assert_eq!(probes, vec![(CandidateOrigin::Upper, Setting::TxBudget(4))]);

        cfg.rx_queue_depth = 8192;
        let probes = Dimension::RxQueueDepth.probes(&cfg, POWER).unwrap();
        assert_eq!(probes, vec![(CandidateOrigin::Lower, Setting::RxQueueDepth(4096))]);
    }

    #[test]
    fn off_ladder_value_is_illegal() {
        let mut cfg = config();
        cfg.rx_queue_depth = 1000;
        let err = Dimension::RxQueueDepth.probes(&cfg, POWER).unwrap_err();
        assert!(matches!(
            err,
            TunerError::IllegalSetting {
                dimension: Dimension::RxQueueDepth,
                value: 1000
            }
        ));
    }

    #[test]
    fn toggles_flip() {
        let cfg = config();
        assert_eq!(
            Dimension::CqeCompress.probes(&cfg, POWER).unwrap(),
            vec![(CandidateOrigin::Toggled, Setting::CqeCompress(false))]
        );
        assert_eq!(
            Dimension::PowerState.probes(&cfg, POWER).unwrap(),
            vec![(CandidateOrigin::Toggled, Setting::PowerState(0x7fff))]
        );
        assert_eq!(toggle_power_state(POWER, 0x7fff), Some(0x6000));
        assert_eq!(toggle_power_state(POWER, 0x1234), None);
    }

    #[test]
    fn round_order_is_fixed() {
        let mut order = vec![Dimension::RxQueueDepth];
        while let Some(next) = order.last().and_then(|d| d.next()) {
            order.push(next);
        }
        assert_eq!(order, Dimension::ROUND.to_vec());
    }

    #[test]
    fn settings_write_back() {
        let mut cfg = config();
        Setting::TxBudget(8).write_to(&mut cfg);
        Setting::RxStriding(false).write_to(&mut cfg);
        assert_eq!(cfg.tx_budget, 8);
        assert!(!cfg.rx_striding);
        assert_eq!(Dimension::TxBudget.current(&cfg), Setting::TxBudget(8));
    }
}
