//! Picks the winning candidate of a dimension step.
//!
//! A candidate "processes everything" when fewer than `drop_threshold`
//! packets per second slip past the action. Among those, the cheapest in
//! CPU wins. If none do, a challenger has to clearly beat both the other
//! candidates and the reference throughput, otherwise the current setting
//! stays.

use crate::applier::apply_setting;
use crate::dimension::{CandidateOrigin, Dimension};
use crate::error::TunerError;
use crate::evaluator::{Candidate, Evaluation};
use crate::nic_config::NicConfig;
use crate::platform::Platform;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionPolicy {
    pub drop_threshold: u64,
    pub pps_threshold: f64,
}

impl SelectionPolicy {
    pub fn is_admissible(&self, candidate: &Candidate) -> bool {
        candidate.unprocessed < self.drop_threshold
    }

    /// True if `throughput` is strictly above `other` scaled by the ratio.
    fn beats(&self, throughput: u64, other: u64) -> bool {
        throughput as f64 > other as f64 * self.pps_threshold
    }

    /// Chooses a winner. Returns `None` only for an empty slice.
    pub fn select<'a>(&self, candidates: &'a [Candidate], external: u64) -> Option<&'a Candidate> {
        let current = candidates
            .iter()
            .find(|c| c.origin == CandidateOrigin::Current)
            .or_else(|| candidates.first())?;

        let mut best: Option<&Candidate> = None;
        for candidate in candidates.iter().filter(|c| self.is_admissible(c)) {
            match best {
                Some(b) if candidate.cpu >= b.cpu => {}
                _ => best = Some(candidate),
            }
        }
        if let Some(best) = best {
            return Some(best);
        }

        for (idx, challenger) in candidates.iter().enumerate() {
            if challenger.origin == CandidateOrigin::Current {
                continue;
            }
            let beats_field = candidates
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != idx)
                .all(|(_, other)| self.beats(challenger.throughput, other.throughput));
            if beats_field && self.beats(challenger.throughput, external) {
                return Some(challenger);
            }
        }
        Some(current)
    }
}

/// Result of one dimension step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub config: NicConfig,
    pub winner: Candidate,
}

/// Selects the winner of `evaluation`, writes it into the config and
/// applies it to the hardware.
pub fn decide<P: Platform + ?Sized>(
    platform: &mut P,
    policy: &SelectionPolicy,
    evaluation: Evaluation,
    external: u64,
) -> Result<StepOutcome, TunerError> {
    let Evaluation {
        dimension,
        candidates,
        mut config,
    } = evaluation;
    let Some(winner) = policy.select(&candidates, external).copied() else {
        // Nothing was measured, so nothing changed.
        let setting = dimension.current(&config);
        return Ok(StepOutcome {
            config,
            winner: Candidate {
                setting,
                origin: CandidateOrigin::Current,
                throughput: external,
                cpu: 0.0,
                unprocessed: 0,
            },
        });
    };
    log_decision(policy, dimension, &candidates, &winner, external);

    winner.setting.write_to(&mut config);
    apply_setting(platform, &config, winner.setting)?;
    Ok(StepOutcome { config, winner })
}

fn log_decision(
    policy: &SelectionPolicy,
    dimension: Dimension,
    candidates: &[Candidate],
    winner: &Candidate,
    external: u64,
) {
    if policy.is_admissible(winner) {
        let runner_up = candidates
            .iter()
            .filter(|c| c.setting != winner.setting)
            .map(|c| c.cpu)
            .fold(f64::NAN, f64::min);
        if runner_up.is_nan() {
            info!("{dimension}: {} {} is best (CPU={:.2})", winner.origin, winner.setting, winner.cpu);
        } else {
            info!(
                "{dimension}: {} {} is best (CPU={:.2}) by (CPU={:.2})",
                winner.origin,
                winner.setting,
                winner.cpu,
                runner_up - winner.cpu
            );
        }
    } else if winner.origin == CandidateOrigin::Current {
        info!(
            "{dimension}: nothing processes everything, keeping current {} ({} pps, reference {} pps)",
            winner.setting, winner.throughput, external
        );
    } else {
        info!(
            "{dimension}: nothing processes everything, {} {} is better (PPS={})",
            winner.origin, winner.setting, winner.throughput
        );
    }
}
