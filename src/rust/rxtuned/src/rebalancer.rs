//! Grows or shrinks the set of cores servicing the interface, and evens
//! out RSS when one core carries more than its share.

use crate::applier::apply_indirection;
use crate::error::{nic_op, TunerError};
use crate::metrics::{active_cpu, counter_rates, per_core_cpu};
use crate::nic_config::NicConfig;
use crate::platform::Platform;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Average CPU above which another core is added.
pub const GROW_ABOVE_PCT: f64 = 80.0;

/// Average CPU below which a core is removed.
pub const SHRINK_BELOW_PCT: f64 = 60.0;

/// Only every fifth table entry is moved when equalising.
const EQUALIZE_STRIDE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElasticityPolicy {
    pub max_cores: u32,
    pub pps_threshold: f64,
    pub interval: Duration,
}

/// One core is hot while another idles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Skew {
    pub busiest: usize,
    pub busiest_pct: f64,
    pub idlest: usize,
    pub idlest_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoreChange {
    Hold,
    Grow,
    Shrink,
    Equalize(Skew),
}

#[derive(Debug, Clone)]
pub struct RebalanceOutcome {
    pub config: NicConfig,
    /// Reference throughput after the step
    pub external: u64,
    /// Average CPU that triggered the decision
    pub cpu: f64,
    pub change: CoreChange,
    /// False if a core-count change was tried and rolled back
    pub kept: bool,
}

/// Looks for skew among the first `core_count - 1` cores. Ties resolve
/// to the lowest core number.
pub fn detect_skew(per_core: &[f64], core_count: u32) -> Option<Skew> {
    let considered = (core_count.saturating_sub(1) as usize).min(per_core.len());
    let cores = &per_core[..considered];

    let (busiest, busiest_pct) = cores
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (core, pct)| match best {
            Some((_, top)) if pct <= top => best,
            _ => Some((core, pct)),
        })?;
    let (idlest, idlest_pct) = cores
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (core, pct)| match best {
            Some((_, low)) if pct >= low => best,
            _ => Some((core, pct)),
        })?;

    (busiest_pct > GROW_ABOVE_PCT && idlest_pct < SHRINK_BELOW_PCT).then_some(Skew {
        busiest,
        busiest_pct,
        idlest,
        idlest_pct,
    })
}

/// Points every fifth entry that targets `busiest` at `idlest` instead.
/// Returns how many entries moved.
pub fn equalize_table(table: &mut [u32], busiest: u32, idlest: u32) -> usize {
    let mut moved = 0;
    for entry in table.iter_mut().step_by(EQUALIZE_STRIDE) {
        if *entry == busiest {
            *entry = idlest;
            moved += 1;
        }
    }
    moved
}

/// Adjusts the active core set from current CPU load. A grow or shrink is
/// kept only if the action rate then beats `external`; otherwise the old
/// core set is restored. A failed measurement also restores it before the
/// error is returned, so callers never need to undo a core change.
pub fn rebalance<P: Platform + ?Sized>(
    platform: &mut P,
    policy: &ElasticityPolicy,
    mut config: NicConfig,
    external: u64,
) -> Result<RebalanceOutcome, TunerError> {
    let cpu = active_cpu(platform, &config)?;
    let previous = config.core_count;

    let (change, target) = if cpu > GROW_ABOVE_PCT && previous < policy.max_cores {
        (CoreChange::Grow, previous + 1)
    } else if cpu < SHRINK_BELOW_PCT && previous > 1 {
        let per_core = per_core_cpu(platform)?;
        if let Some(skew) = detect_skew(&per_core, previous) {
            equalize(platform, &config, &skew)?;
            return Ok(RebalanceOutcome {
                config,
                external,
                cpu,
                change: CoreChange::Equalize(skew),
                kept: true,
            });
        }
        (CoreChange::Shrink, previous - 1)
    } else {
        debug!("CPU {cpu:.2}% on {previous} cores, holding");
        return Ok(RebalanceOutcome {
            config,
            external,
            cpu,
            change: CoreChange::Hold,
            kept: true,
        });
    };

    config.set_core_count(target);
    apply_indirection(platform, &config)?;
    let throughput = match counter_rates(platform, &config, policy.interval) {
        Ok(rates) => rates.action,
        Err(e) => {
            warn!("Cores {previous} -> {target}: measurement failed, reverting");
            config.set_core_count(previous);
            apply_indirection(platform, &config)?;
            return Err(e.into());
        }
    };

    if throughput as f64 > external as f64 * policy.pps_threshold {
        info!("Cores {previous} -> {target} at CPU={cpu:.2}: {throughput} pps beats {external} pps");
        Ok(RebalanceOutcome {
            config,
            external: throughput,
            cpu,
            change,
            kept: true,
        })
    } else {
        info!("Cores {previous} -> {target} gave {throughput} pps against {external} pps, reverting");
        config.set_core_count(previous);
        apply_indirection(platform, &config)?;
        Ok(RebalanceOutcome {
            config,
            external,
            cpu,
            change,
            kept: false,
        })
    }
}

fn equalize<P: Platform + ?Sized>(
    platform: &mut P,
    config: &NicConfig,
    skew: &Skew,
) -> Result<(), TunerError> {
    let iface = config.iface.as_str();
    let mut table = platform
        .indirection(iface)
        .map_err(nic_op("read RSS indirection table"))?;
    let moved = equalize_table(&mut table, skew.busiest as u32, skew.idlest as u32);
    info!(
        "Core {} at {:.2}% and core {} at {:.2}%: moving {moved} RSS entries",
        skew.busiest, skew.busiest_pct, skew.idlest, skew.idlest_pct
    );
    if moved > 0 {
        platform
            .set_indirection(iface, &table)
            .map_err(nic_op("write RSS indirection table"))?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::{Load, MockPlatform};
    use crate::nic_config::core_weights;
    use rxtune_config::Config;

    const POLICY: ElasticityPolicy = ElasticityPolicy {
        max_cores: 8,
        pps_threshold: 1.0,
        interval: Duration::from_secs(5),
    };

    fn config(cores: u32) -> NicConfig {
        let mut config = NicConfig::from_config(&Config::default());
        config.set_core_count(cores);
        config
    }

    /// Throughput scales with the cores RSS spreads over; CPU is fixed.
    fn scaling(cpu: Vec<f64>) -> MockPlatform {
        MockPlatform::new(move |m| Load {
            action_pps: m.table_cores() as u64 * 1000,
            total_pps: m.table_cores() as u64 * 1000,
            per_core_cpu: cpu.clone(),
        })
    }

    fn ready(platform: &mut MockPlatform, config: &NicConfig) {
        apply_indirection(platform, config).unwrap();
        platform.writes.clear();
    }

    #[test]
    fn skew_among_all_but_the_last_active_core() {
        let skew = detect_skew(&[95.0, 30.0, 55.0, 99.0], 4).unwrap();
        assert_eq!(skew.busiest, 0);
        assert_eq!(skew.idlest, 1);
        assert_eq!(skew.busiest_pct, 95.0);
        assert_eq!(skew.idlest_pct, 30.0);
    }

    #[test]
    fn ties_pick_the_first_core() {
        let skew = detect_skew(&[90.0, 10.0, 90.0, 10.0, 0.0], 5).unwrap();
        assert_eq!(skew.busiest, 0);
        assert_eq!(skew.idlest, 1);
    }

    #[test]
    fn no_skew_without_a_hot_core() {
        assert!(detect_skew(&[80.0, 30.0, 55.0], 4).is_none());
        assert!(detect_skew(&[95.0, 60.0, 70.0], 4).is_none());
        assert!(detect_skew(&[95.0], 1).is_none());
        assert!(detect_skew(&[], 4).is_none());
    }

    #[test]
    fn equalizing_moves_every_fifth_matching_entry() {
        let mut table = vec![0u32; 20];
        table[10] = 2;
        let moved = equalize_table(&mut table, 0, 1);
        assert_eq!(moved, 3);
        assert_eq!(table[0], 1);
        assert_eq!(table[5], 1);
        assert_eq!(table[10], 2);
        assert_eq!(table[15], 1);
        assert_eq!(table.iter().filter(|e| **e == 1).count(), 3);
    }

    #[test]
    fn busy_cores_grow_when_it_helps() {
        let mut platform = scaling(vec![90.0; 32]);
        let cfg = config(4);
        ready(&mut platform, &cfg);
        let outcome = rebalance(&mut platform, &POLICY, cfg, 1_000).unwrap();
        assert_eq!(outcome.change, CoreChange::Grow);
        assert!(outcome.kept);
        assert_eq!(outcome.config.core_count, 5);
        assert_eq!(outcome.config.core_weights, core_weights(5));
        assert_eq!(outcome.external, 5_000);
        assert_eq!(platform.table_cores(), 5);
    }

    #[test]
    fn growth_that_does_not_help_is_reverted() {
        let mut platform = MockPlatform::steady(1_000, 1_000, 90.0);
        let cfg = config(4);
        ready(&mut platform, &cfg);
        let outcome = rebalance(&mut platform, &POLICY, cfg, 1_000).unwrap();
        assert_eq!(outcome.change, CoreChange::Grow);
        assert!(!outcome.kept);
        assert_eq!(outcome.config.core_count, 4);
        assert_eq!(outcome.config.core_weights, core_weights(4));
        assert_eq!(outcome.external, 1_000);
        assert_eq!(platform.table_cores(), 4);
        assert_eq!(platform.writes, vec!["indirection", "indirection"]);
    }

    #[test]
    fn failed_measurement_after_growing_restores_the_table() {
        let mut platform = scaling(vec![90.0; 32]);
        let cfg = config(4);
        ready(&mut platform, &cfg);
        platform.fail_read = Some(0);
        let err = rebalance(&mut platform, &POLICY, cfg, 1_000).unwrap_err();
        assert!(matches!(err, TunerError::Measurement(_)));
        assert_eq!(platform.table_cores(), 4);
        assert_eq!(platform.writes, vec!["indirection", "indirection"]);
    }

    #[test]
    fn failed_cpu_sample_writes_nothing() {
        let mut platform = scaling(vec![90.0; 32]);
        let cfg = config(4);
        ready(&mut platform, &cfg);
        platform.fail_cpu = true;
        let err = rebalance(&mut platform, &POLICY, cfg, 1_000).unwrap_err();
        assert!(matches!(err, TunerError::Measurement(_)));
        assert!(platform.writes.is_empty());
    }

    #[test]
    fn idle_cores_shrink() {
        let mut platform = MockPlatform::steady(2_000, 2_000, 40.0);
        let cfg = config(4);
        ready(&mut platform, &cfg);
        let outcome = rebalance(&mut platform, &POLICY, cfg, 1_000).unwrap();
        assert_eq!(outcome.change, CoreChange::Shrink);
        assert!(outcome.kept);
        assert_eq!(outcome.config.core_count, 3);
        assert_eq!(outcome.external, 2_000);
    }

    #[test]
    fn skewed_load_edits_the_table_only() {
        let mut cpu = vec![0.0; 32];
        cpu[..4].copy_from_slice(&[95.0, 30.0, 55.0, 40.0]);
        let mut platform = scaling(cpu);
        let cfg = config(4);
        ready(&mut platform, &cfg);
        let before = platform.table.clone();

        let outcome = rebalance(&mut platform, &POLICY, cfg.clone(), 1_000).unwrap();
        assert!(matches!(outcome.change, CoreChange::Equalize(Skew { busiest: 0, idlest: 1, .. })));
        assert_eq!(outcome.config, cfg);
        assert_eq!(outcome.external, 1_000);
        assert_eq!(platform.writes, vec!["indirection"]);
        assert_eq!(platform.table[0], 1);
        assert_eq!(before[0], 0);
        assert_eq!(platform.table[1], before[1]);
    }

    #[test]
    fn moderate_load_holds_without_writes() {
        let mut platform = MockPlatform::steady(1_000, 1_000, 70.0);
        let cfg = config(4);
        ready(&mut platform, &cfg);
        let outcome = rebalance(&mut platform, &POLICY, cfg.clone(), 1_000).unwrap();
        assert_eq!(outcome.change, CoreChange::Hold);
        assert_eq!(outcome.config, cfg);
        assert!(platform.writes.is_empty());
    }

    #[test]
    fn no_growth_past_max_cores() {
        let mut platform = MockPlatform::steady(1_000, 1_000, 95.0);
        let cfg = config(POLICY.max_cores);
        ready(&mut platform, &cfg);
        let outcome = rebalance(&mut platform, &POLICY, cfg, 1_000).unwrap();
        assert_eq!(outcome.change, CoreChange::Hold);
        assert!(platform.writes.is_empty());
    }

    #[test]
    fn single_core_never_shrinks() {
        let mut platform = MockPlatform::steady(1_000, 1_000, 5.0);
        let cfg = config(1);
        ready(&mut platform, &cfg);
        let outcome = rebalance(&mut platform, &POLICY, cfg, 1_000).unwrap();
        assert_eq!(outcome.change, CoreChange::Hold);
    }
}
