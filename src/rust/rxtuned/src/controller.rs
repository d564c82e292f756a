//! The tuning state machine. Each call to [`Tuner::step`] runs one state
//! to completion and moves to the next; there is no terminal state.

use crate::applier::{apply, apply_all, apply_power_state};
use crate::config::TunerSettings;
use crate::datalog::{TelemetrySink, TuningRecord};
use crate::dimension::Dimension;
use crate::error::TunerError;
use crate::evaluator::evaluate;
use crate::metrics::measure;
use crate::nic_config::NicConfig;
use crate::platform::Platform;
use crate::rebalancer::rebalance;
use crate::selection::decide;
use std::convert::Infallible;
use std::fmt::Display;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunerState {
    Startup,
    Baseline,
    Tuning(Dimension),
    CoreElasticity,
}

impl Display for TunerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunerState::Startup => write!(f, "Startup"),
            TunerState::Baseline => write!(f, "Baseline"),
            TunerState::Tuning(dimension) => write!(f, "{dimension}"),
            TunerState::CoreElasticity => write!(f, "Core elasticity"),
        }
    }
}

pub struct Tuner<P: Platform, S: TelemetrySink> {
    platform: P,
    sink: S,
    settings: TunerSettings,
    config: NicConfig,
    state: TunerState,
    external: u64,
    round: u64,
}

impl<P: Platform, S: TelemetrySink> Tuner<P, S> {
    pub fn new(platform: P, sink: S, settings: TunerSettings, config: NicConfig) -> Self {
        Self {
            platform,
            sink,
            settings,
            config,
            state: TunerState::Startup,
            external: 0,
            round: 0,
        }
    }

    pub fn state(&self) -> TunerState {
        self.state
    }

    pub fn config(&self) -> &NicConfig {
        &self.config
    }

    /// Throughput the next challenger has to beat.
    pub fn external_reference(&self) -> u64 {
        self.external
    }

    /// Rounds started so far.
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Tunes forever. Only returns on a fatal error.
    pub fn run(mut self) -> Result<Infallible, TunerError> {
        loop {
            self.step()?;
        }
    }

    /// Runs the current state and advances. An inconclusive measurement
    /// puts back the settings the step started from and moves on; any
    /// other error is returned.
    pub fn step(&mut self) -> Result<(), TunerError> {
        let state = self.state;
        let before = self.config.clone();
        let result = match state {
            TunerState::Startup => self.startup(),
            TunerState::Baseline => self.baseline(),
            TunerState::Tuning(dimension) => self.tune(dimension),
            TunerState::CoreElasticity => self.core_elasticity(),
        };
        match result {
            Ok(()) => {}
            Err(TunerError::Measurement(e)) => {
                warn!("{state}: measurement inconclusive, keeping previous settings ({e})");
                self.restore(state, &before)?;
            }
            Err(e) => {
                error!("{state}: {e}");
                return Err(e);
            }
        }
        self.state = self.next_state(state);
        Ok(())
    }

    fn next_state(&self, state: TunerState) -> TunerState {
        let first = TunerState::Tuning(Dimension::ROUND[0]);
        match state {
            TunerState::Startup => TunerState::Baseline,
            TunerState::Baseline | TunerState::CoreElasticity => first,
            TunerState::Tuning(dimension) => match dimension.next() {
                Some(next) => TunerState::Tuning(next),
                None if self.settings.core_elasticity => TunerState::CoreElasticity,
                None => first,
            },
        }
    }

    fn startup(&mut self) -> Result<(), TunerError> {
        info!("Applying initial configuration to {}", self.config.iface);
        apply_all(&mut self.platform, &self.config)?;
        self.platform.attach_counter(&self.config.iface)?;
        Ok(())
    }

    fn baseline(&mut self) -> Result<(), TunerError> {
        let sample = measure(&mut self.platform, &self.config, self.settings.interval)?;
        info!("Baseline {} pps at CPU={:.2}", sample.throughput, sample.cpu);
        self.external = sample.throughput;
        self.emit(sample.throughput, sample.cpu);
        Ok(())
    }

    fn tune(&mut self, dimension: Dimension) -> Result<(), TunerError> {
        if dimension == Dimension::ROUND[0] {
            self.start_round();
        }
        let evaluation = evaluate(
            &mut self.platform,
            dimension,
            self.config.clone(),
            self.settings.interval,
            self.settings.power_values,
        )?;
        let outcome = decide(
            &mut self.platform,
            &self.settings.selection,
            evaluation,
            self.external,
        )?;
        self.external = outcome.winner.throughput;
        self.config = outcome.config;
        self.emit(outcome.winner.throughput, outcome.winner.cpu);
        Ok(())
    }

    fn core_elasticity(&mut self) -> Result<(), TunerError> {
        let outcome = rebalance(
            &mut self.platform,
            &self.settings.elasticity,
            self.config.clone(),
            self.external,
        )?;
        self.external = outcome.external;
        self.config = outcome.config;
        self.emit(outcome.external, outcome.cpu);
        Ok(())
    }

    fn start_round(&mut self) {
        self.round += 1;
        if self.round > 1 && self.settings.reset_reference_each_round {
            self.external = 0;
        }
        info!("Round {} (reference {} pps)", self.round, self.external);
    }

    /// Puts the hardware back to `before` for whatever `state` may have
    /// touched. Core elasticity reverts its own core-count changes and an
    /// RSS equalisation is not part of `before`, so it is left alone.
    fn restore(&mut self, state: TunerState, before: &NicConfig) -> Result<(), TunerError> {
        self.config = before.clone();
        match state {
            TunerState::Startup | TunerState::Baseline | TunerState::CoreElasticity => {}
            TunerState::Tuning(Dimension::PowerState) => {
                apply_power_state(&mut self.platform, before.power_state)?
            }
            TunerState::Tuning(_) => apply(&mut self.platform, before)?,
        }
        Ok(())
    }

    fn emit(&mut self, throughput: u64, cpu: f64) {
        let record = TuningRecord::new(&self.config, throughput, cpu);
        if let Err(e) = self.sink.record(&record) {
            error!("{e}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::datalog::DatalogError;
    use crate::mock::{Load, MockPlatform};
    use rxtune_config::Config;

    impl TelemetrySink for Vec<TuningRecord> {
        fn record(&mut self, record: &TuningRecord) -> Result<(), DatalogError> {
            self.push(record.clone());
            Ok(())
        }
    }

    fn tuner(platform: MockPlatform, config: Config) -> Tuner<MockPlatform, Vec<TuningRecord>> {
        let settings = TunerSettings::from_config(&config, None);
        let nic = NicConfig::from_config(&config);
        Tuner::new(platform, Vec::new(), settings, nic)
    }

    fn steps(tuner: &mut Tuner<MockPlatform, Vec<TuningRecord>>, n: usize) {
        for _ in 0..n {
            tuner.step().unwrap();
        }
    }

    #[test]
    fn startup_applies_everything_and_attaches() {
        let mut t = tuner(MockPlatform::steady(1000, 1000, 50.0), Config::default());
        t.step().unwrap();
        assert_eq!(t.state(), TunerState::Baseline);
        let p = t.platform();
        assert_eq!(p.attached.as_deref(), Some("enp52s0f1np1"));
        assert_eq!(p.ring.rx_pending, 1024);
        assert_eq!(p.ring.tx_pending, 64);
        assert_eq!(p.power_state, 0x6000);
        assert_eq!(p.table_cores(), 10);
    }

    #[test]
    fn baseline_seeds_the_reference_and_logs() {
        let mut t = tuner(MockPlatform::steady(1000, 1000, 50.0), Config::default());
        steps(&mut t, 2);
        assert_eq!(t.external_reference(), 1000);
        assert_eq!(t.sink().len(), 1);
        assert_eq!(t.state(), TunerState::Tuning(Dimension::RxQueueDepth));
    }

    #[test]
    fn a_round_visits_each_dimension_in_order() {
        let mut t = tuner(MockPlatform::steady(1000, 1000, 50.0), Config::default());
        steps(&mut t, 2);
        let mut visited = Vec::new();
        for _ in 0..5 {
            if let TunerState::Tuning(d) = t.state() {
                visited.push(d);
            }
            t.step().unwrap();
        }
        assert_eq!(visited, Dimension::ROUND.to_vec());
        assert_eq!(t.state(), TunerState::Tuning(Dimension::RxQueueDepth));
        assert_eq!(t.sink().len(), 6);
        assert_eq!(t.round(), 1);
    }

    #[test]
    fn elasticity_closes_the_round_when_enabled() {
        let config = Config {
            core_elasticity: true,
            ..Default::default()
        };
        let mut t = tuner(MockPlatform::steady(1000, 1000, 70.0), config);
        steps(&mut t, 7);
        assert_eq!(t.state(), TunerState::CoreElasticity);
        t.step().unwrap();
        assert_eq!(t.state(), TunerState::Tuning(Dimension::RxQueueDepth));
        assert_eq!(t.sink().len(), 7);
    }

    #[test]
    fn failed_elasticity_sample_keeps_the_equalised_table() {
        let mut config = Config {
            core_elasticity: true,
            ..Default::default()
        };
        config.defaults.core_count = 4;
        let platform = MockPlatform::new(|_| {
            let mut per_core_cpu = vec![0.0; 32];
            per_core_cpu[..4].copy_from_slice(&[95.0, 30.0, 55.0, 40.0]);
            Load {
                action_pps: 1000,
                total_pps: 1000,
                per_core_cpu,
            }
        });
        let mut t = tuner(platform, config);
        steps(&mut t, 7);
        assert_eq!(t.state(), TunerState::CoreElasticity);
        assert_eq!(t.platform().table[0], 0);
        t.step().unwrap();
        assert_eq!(t.platform().table[0], 1);

        steps(&mut t, 5);
        assert_eq!(t.state(), TunerState::CoreElasticity);
        let table = t.platform().table.clone();
        t.platform.fail_cpu = true;
        t.platform.writes.clear();
        t.step().unwrap();
        assert!(t.platform().writes.is_empty());
        assert_eq!(t.platform().table, table);
        assert_eq!(t.platform().table[0], 1);
        assert_eq!(t.config().core_count, 4);
        assert_eq!(t.state(), TunerState::Tuning(Dimension::RxQueueDepth));
    }

    #[test]
    fn cheapest_admissible_depth_is_kept() {
        // Everything is processed; a 512 ring costs the least CPU.
        let platform = MockPlatform::new(|m| Load {
            action_pps: 1_000_000,
            total_pps: 1_000_020,
            per_core_cpu: vec![if m.ring.rx_pending == 512 { 30.0 } else { 45.0 }; 32],
        });
        let mut t = tuner(platform, Config::default());
        steps(&mut t, 3);
        assert_eq!(t.config().rx_queue_depth, 512);
        assert_eq!(t.platform().ring.rx_pending, 512);
        assert_eq!(t.external_reference(), 1_000_000);
        let last = t.sink().last().unwrap();
        assert_eq!(last.rxqueue, 512);
        assert_eq!(last.cpu, "30.000000");
    }

    #[test]
    fn inconclusive_step_restores_and_moves_on() {
        let platform = MockPlatform::new(|m| Load {
            action_pps: m.ring.rx_pending as u64,
            total_pps: m.ring.rx_pending as u64,
            per_core_cpu: vec![50.0; 32],
        });
        let mut t = tuner(platform, Config::default());
        steps(&mut t, 2);
        let reference = t.external_reference();
        let records = t.sink().len();

        // The current value measures fine; the lower probe's first read fails.
        let before = t.config().clone();
        t.platform.writes.clear();
        t.platform.fail_read = Some(2);
        t.step().unwrap();

        assert_eq!(t.state(), TunerState::Tuning(Dimension::TxBudget));
        assert_eq!(t.config(), &before);
        assert_eq!(t.external_reference(), reference);
        assert_eq!(t.sink().len(), records);
        assert_eq!(t.platform().ring.rx_pending, 1024);
        assert_eq!(t.platform().writes, vec!["ring", "ring"]);
    }

    #[test]
    fn off_ladder_setting_stops_the_tuner() {
        let platform = MockPlatform::steady(1000, 1000, 50.0);
        let config = Config::default();
        let settings = TunerSettings::from_config(&config, None);
        let mut nic = NicConfig::from_config(&config);
        nic.tx_budget = 100;
        let t = Tuner::new(platform, Vec::new(), settings, nic);
        let err = t.run().unwrap_err();
        assert!(matches!(
            err,
            TunerError::IllegalSetting {
                dimension: Dimension::TxBudget,
                value: 100
            }
        ));
    }

    #[test]
    fn reference_can_reset_each_round() {
        let config = Config {
            reset_reference_each_round: true,
            ..Default::default()
        };
        // Saturated, so every decision falls back to throughput.
        let mut t = tuner(MockPlatform::steady(1000, 5000, 50.0), config);
        steps(&mut t, 7);
        assert_eq!(t.round(), 1);
        assert_eq!(t.external_reference(), 1000);
        // Entering round two zeroes the reference before measuring.
        t.platform.fail_read = Some(0);
        t.step().unwrap();
        assert_eq!(t.round(), 2);
        assert_eq!(t.external_reference(), 0);
    }
}
